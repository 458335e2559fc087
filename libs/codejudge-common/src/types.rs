use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a submission: who submitted it and for which assignment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId {
    pub student: String,
    pub assignment: String,
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.student, self.assignment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub file_name: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub input: String,
    pub expected_output: String,
}

/// How a test process ended
///
/// `Signaled` and `TimedOut` stand in for a real exit code when the process
/// crashed or was killed by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
    TimedOut,
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {}", code),
            ExitStatus::Signaled(signal) => write!(f, "killed by signal {}", signal),
            ExitStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Raw result of running a compiled program against one input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub exit_status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
    pub timed_out: bool,
    pub output_truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    OutputMismatch,
    NonZeroExit,
    Timeout,
    Crash,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailReason::OutputMismatch => "output mismatch",
            FailReason::NonZeroExit => "non-zero exit",
            FailReason::Timeout => "timeout",
            FailReason::Crash => "crash",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail(FailReason),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestVerdict {
    pub test_case: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompileSummary {
    Success,
    Failure { diagnostic: String },
    /// The grader failed before a compile result existed
    NotCompleted,
}

/// Feedback attached to a submission that failed to compile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Feedback {
    Generated(String),
    Unavailable(String),
}

impl Feedback {
    pub fn unavailable(reason: impl fmt::Display) -> Self {
        Feedback::Unavailable(format!("feedback unavailable: {}", reason))
    }

    pub fn text(&self) -> &str {
        match self {
            Feedback::Generated(text) | Feedback::Unavailable(text) => text,
        }
    }
}

/// Terminal artifact of evaluating one submission
///
/// Carries no timing information, so re-evaluating a deterministic program
/// produces an equal report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub submission: SubmissionId,
    pub compile: CompileSummary,
    pub verdicts: Vec<TestVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    pub analysis: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infrastructure_error: Option<String>,
}

impl SubmissionReport {
    /// Report for a submission the grader could not evaluate
    pub fn infrastructure_failure(
        submission: SubmissionId,
        compile: CompileSummary,
        analysis: BTreeMap<String, usize>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            submission,
            compile,
            verdicts: Vec::new(),
            feedback: None,
            analysis,
            infrastructure_error: Some(error.to_string()),
        }
    }

    pub fn compiled(&self) -> bool {
        self.compile == CompileSummary::Success && self.infrastructure_error.is_none()
    }

    pub fn passed_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.verdict.is_pass()).count()
    }
}

/// Serialized output of one grading run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reports: Vec<SubmissionReport>,
}
