/// Evaluation Orchestrator - High-Level Pipeline
///
/// **Responsibility:**
/// Sequence compile → run → compare for one submission and aggregate a
/// SubmissionReport.
///
/// **Architecture:**
/// 1. Compiler turns the source into an artifact or a diagnostic (compiler.rs)
/// 2. ProcessEngine runs the artifact once per test case (engine.rs)
/// 3. Evaluator assigns a verdict to each run (evaluator.rs)
/// 4. On compile failure, a FeedbackRequester explains the diagnostic (feedback.rs)
///
/// This module is the glue layer - it knows nothing about:
/// - How processes are spawned (engine's job)
/// - How outputs are compared (evaluator's job)
/// - Which model writes the feedback (feedback's job)

use crate::analysis;
use crate::compiler::{CompileResult, Compiler};
use crate::engine::ProcessEngine;
use crate::error::JudgeResult;
use crate::evaluator;
use crate::feedback::{FeedbackRequest, FeedbackRequester};
use codejudge_common::config::JudgeConfig;
use codejudge_common::types::{
    CompileSummary, Feedback, Submission, SubmissionReport, TestCase, TestVerdict,
};
use futures_util::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle of one submission evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStage {
    Pending,
    Compiling,
    CompileFailed,
    Running,
    Aggregated,
}

impl EvaluationStage {
    pub fn can_advance_to(self, next: EvaluationStage) -> bool {
        use EvaluationStage::*;
        matches!(
            (self, next),
            (Pending, Compiling)
                | (Compiling, CompileFailed)
                | (Compiling, Running)
                | (Running, Aggregated)
        )
    }

    fn advance(&mut self, next: EvaluationStage) {
        debug_assert!(self.can_advance_to(next), "invalid transition {} -> {}", self, next);
        debug!(from = %self, to = %next, "Evaluation stage");
        *self = next;
    }
}

impl fmt::Display for EvaluationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EvaluationStage::Pending => "pending",
            EvaluationStage::Compiling => "compiling",
            EvaluationStage::CompileFailed => "compile_failed",
            EvaluationStage::Running => "running",
            EvaluationStage::Aggregated => "aggregated",
        };
        f.write_str(label)
    }
}

/// Evaluates submissions against a fixed set of test cases
///
/// Holds no per-submission state, so one instance can evaluate many
/// submissions concurrently.
pub struct Orchestrator {
    config: JudgeConfig,
    compiler: Compiler,
    engine: ProcessEngine,
    feedback: Arc<dyn FeedbackRequester>,
    problem: Option<String>,
}

impl Orchestrator {
    pub fn new(config: JudgeConfig, feedback: Arc<dyn FeedbackRequester>) -> Self {
        Self {
            compiler: Compiler::new(config.compiler.clone()),
            engine: ProcessEngine::new(config.run.max_output_bytes),
            config,
            feedback,
            problem: None,
        }
    }

    /// Problem statement forwarded to feedback generation
    pub fn with_problem(mut self, problem: impl Into<String>) -> Self {
        self.problem = Some(problem.into());
        self
    }

    /// Evaluate one submission
    ///
    /// Compile failures and failing test cases are part of the report; only
    /// grader failures (missing compiler, spawn errors, unwritable temp dir)
    /// come back as `Err`.
    pub async fn evaluate(
        &self,
        submission: &Submission,
        test_cases: &[TestCase],
    ) -> JudgeResult<SubmissionReport> {
        let mut stage = EvaluationStage::Pending;
        self.evaluate_tracked(submission, test_cases, &mut stage).await
    }

    #[tracing::instrument(
        skip_all,
        fields(
            submission = %submission.id,
            evaluation_id = %uuid::Uuid::new_v4(),
            test_count = test_cases.len()
        )
    )]
    async fn evaluate_tracked(
        &self,
        submission: &Submission,
        test_cases: &[TestCase],
        stage: &mut EvaluationStage,
    ) -> JudgeResult<SubmissionReport> {
        let started = Instant::now();
        let analysis = analysis::analyze(&submission.source);

        stage.advance(EvaluationStage::Compiling);
        let artifact = match self.compiler.compile(&submission.source).await? {
            CompileResult::Success(artifact) => artifact,
            CompileResult::Failure { diagnostic } => {
                stage.advance(EvaluationStage::CompileFailed);
                let feedback = self.request_feedback(submission, &diagnostic).await;

                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    feedback_available = matches!(feedback, Feedback::Generated(_)),
                    "Submission failed to compile"
                );

                return Ok(SubmissionReport {
                    submission: submission.id.clone(),
                    compile: CompileSummary::Failure { diagnostic },
                    verdicts: Vec::new(),
                    feedback: Some(feedback),
                    analysis,
                    infrastructure_error: None,
                });
            }
        };

        stage.advance(EvaluationStage::Running);
        let time_limit = self.config.time_limit();
        let mut verdicts = Vec::with_capacity(test_cases.len());

        for (idx, test_case) in test_cases.iter().enumerate() {
            let run = self.engine.run(&artifact, &test_case.input, time_limit).await?;
            let verdict =
                evaluator::compare(&run, &test_case.expected_output, self.config.comparison);

            debug!(
                test_num = idx + 1,
                test_case = %test_case.name,
                status = %run.exit_status,
                execution_ms = run.elapsed_ms,
                verdict = ?verdict,
                "Test result"
            );

            verdicts.push(TestVerdict {
                test_case: test_case.name.clone(),
                verdict,
            });
        }

        // Release the build workspace before reporting
        drop(artifact);
        stage.advance(EvaluationStage::Aggregated);

        let (passed, total) = evaluator::summarize(&verdicts);
        info!(
            passed,
            total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Submission evaluated"
        );

        Ok(SubmissionReport {
            submission: submission.id.clone(),
            compile: CompileSummary::Success,
            verdicts,
            feedback: None,
            analysis,
            infrastructure_error: None,
        })
    }

    /// Ask for feedback on a diagnostic; never fails and never waits longer
    /// than the configured feedback timeout
    async fn request_feedback(&self, submission: &Submission, diagnostic: &str) -> Feedback {
        let request = FeedbackRequest {
            submission: submission.id.clone(),
            diagnostic: diagnostic.to_string(),
            source: submission.source.clone(),
            problem: self.problem.clone(),
        };

        let timeout = self.config.feedback_timeout();
        match tokio::time::timeout(timeout, self.feedback.generate_feedback(&request)).await {
            Ok(Ok(text)) => Feedback::Generated(text),
            Ok(Err(e)) => {
                warn!(error = %e, "Feedback request failed");
                Feedback::unavailable(e)
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Feedback request timed out");
                Feedback::unavailable(format!(
                    "request timed out after {}ms",
                    timeout.as_millis()
                ))
            }
        }
    }

    /// Evaluate one submission, folding grader failures into the report
    pub async fn evaluate_or_report(
        &self,
        submission: &Submission,
        test_cases: &[TestCase],
    ) -> SubmissionReport {
        let mut stage = EvaluationStage::Pending;
        match self.evaluate_tracked(submission, test_cases, &mut stage).await {
            Ok(report) => report,
            Err(e) => {
                error!(
                    submission = %submission.id,
                    stage = %stage,
                    error = %e,
                    "Infrastructure error while grading"
                );
                let compile = if stage == EvaluationStage::Running {
                    CompileSummary::Success
                } else {
                    CompileSummary::NotCompleted
                };
                SubmissionReport::infrastructure_failure(
                    submission.id.clone(),
                    compile,
                    analysis::analyze(&submission.source),
                    e,
                )
            }
        }
    }

    /// Evaluate a batch of submissions, at most `max_parallel_submissions`
    /// at a time
    ///
    /// Returns exactly one report per submission, in submission order.
    pub async fn evaluate_batch(
        &self,
        submissions: &[Submission],
        test_cases: &[TestCase],
    ) -> Vec<SubmissionReport> {
        info!(
            submissions = submissions.len(),
            test_cases = test_cases.len(),
            parallelism = self.config.max_parallel_submissions,
            "Starting batch"
        );

        stream::iter(submissions)
            .map(|submission| self.evaluate_or_report(submission, test_cases))
            .buffered(self.config.max_parallel_submissions.max(1))
            .collect()
            .await
    }
}
