// Console rendering of submission reports

use crate::evaluator::summarize;
use codejudge_common::types::{CompileSummary, Feedback, SubmissionReport, Verdict};
use std::fmt::Write;

/// Render one report the way the grader prints it to the terminal
pub fn render_report(report: &SubmissionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "→ {}", report.submission);

    if !report.analysis.is_empty() {
        let counts: Vec<String> = report
            .analysis
            .iter()
            .map(|(name, count)| format!("{}={}", name, count))
            .collect();
        let _ = writeln!(out, "  Analysis: {}", counts.join(", "));
    }

    if let Some(error) = &report.infrastructure_error {
        let _ = writeln!(out, "  ⚠ Grader error: {}", error);
        return out;
    }

    match &report.compile {
        CompileSummary::Success => {
            for verdict in &report.verdicts {
                match verdict.verdict {
                    Verdict::Pass => {
                        let _ = writeln!(out, "    ✓ {}: Passed", verdict.test_case);
                    }
                    Verdict::Fail(reason) => {
                        let _ = writeln!(out, "    ✗ {}: Failed ({})", verdict.test_case, reason);
                    }
                }
            }
            let (passed, total) = summarize(&report.verdicts);
            let _ = writeln!(out, "  Score: {} / {}", passed, total);
        }
        CompileSummary::Failure { diagnostic } => {
            let _ = writeln!(out, "  ✗ Compilation failed");
            for line in diagnostic.lines().take(5) {
                let _ = writeln!(out, "    {}", line);
            }
            match &report.feedback {
                Some(Feedback::Generated(text)) => {
                    let _ = writeln!(out, "  Feedback:");
                    for line in text.lines() {
                        let _ = writeln!(out, "    {}", line);
                    }
                }
                Some(Feedback::Unavailable(reason)) => {
                    let _ = writeln!(out, "  ⚠ {}", reason);
                }
                None => {}
            }
        }
        CompileSummary::NotCompleted => {
            let _ = writeln!(out, "  ⚠ Compilation did not complete");
        }
    }

    out
}

/// Summary table: one row per submission plus the processed count
pub fn render_summary(reports: &[SubmissionReport]) -> String {
    let width = reports
        .iter()
        .map(|r| r.submission.to_string().len())
        .max()
        .unwrap_or(0)
        .max("Submission".len());

    let mut out = String::new();
    let _ = writeln!(out, "{:<width$}  Result", "Submission", width = width);
    let _ = writeln!(out, "{}", "-".repeat(width + 20));

    for report in reports {
        let result = if report.infrastructure_error.is_some() {
            "grader error".to_string()
        } else {
            match report.compile {
                CompileSummary::Success => {
                    let (passed, total) = summarize(&report.verdicts);
                    format!("{} / {} passed", passed, total)
                }
                CompileSummary::Failure { .. } => "compile failed".to_string(),
                CompileSummary::NotCompleted => "not compiled".to_string(),
            }
        };
        let _ = writeln!(
            out,
            "{:<width$}  {}",
            report.submission.to_string(),
            result,
            width = width
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Total submissions processed: {}", reports.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use codejudge_common::types::{FailReason, SubmissionId, TestVerdict};
    use std::collections::BTreeMap;

    fn report(compile: CompileSummary) -> SubmissionReport {
        SubmissionReport {
            submission: SubmissionId {
                student: "sam".to_string(),
                assignment: "hw1".to_string(),
            },
            compile,
            verdicts: Vec::new(),
            feedback: None,
            analysis: BTreeMap::new(),
            infrastructure_error: None,
        }
    }

    #[test]
    fn test_render_graded() {
        let mut r = report(CompileSummary::Success);
        r.verdicts = vec![
            TestVerdict { test_case: "01".to_string(), verdict: Verdict::Pass },
            TestVerdict {
                test_case: "02".to_string(),
                verdict: Verdict::Fail(FailReason::Timeout),
            },
        ];

        let text = render_report(&r);
        assert!(text.contains("sam/hw1"));
        assert!(text.contains("✓ 01: Passed"));
        assert!(text.contains("✗ 02: Failed (timeout)"));
        assert!(text.contains("Score: 1 / 2"));
    }

    #[test]
    fn test_render_compile_failure() {
        let mut r = report(CompileSummary::Failure {
            diagnostic: "error: expected ';'".to_string(),
        });
        r.feedback = Some(Feedback::Generated("- missing semicolon".to_string()));

        let text = render_report(&r);
        assert!(text.contains("Compilation failed"));
        assert!(text.contains("error: expected ';'"));
        assert!(text.contains("- missing semicolon"));
    }

    #[test]
    fn test_render_summary() {
        let graded = report(CompileSummary::Success);
        let failed = report(CompileSummary::Failure { diagnostic: String::new() });
        let mut broken = report(CompileSummary::NotCompleted);
        broken.infrastructure_error = Some("compiler missing".to_string());

        let text = render_summary(&[graded, failed, broken]);
        assert!(text.contains("0 / 0 passed"));
        assert!(text.contains("compile failed"));
        assert!(text.contains("grader error"));
        assert!(text.contains("Total submissions processed: 3"));
    }
}
