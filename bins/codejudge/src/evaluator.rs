/// Verdict Evaluator - Output Comparison Logic
///
/// **Core Responsibility:**
/// Compare a raw RunResult against the expected output and assign a Verdict.
///
/// **Critical Properties:**
/// - Knows nothing about processes or compilers
/// - Pure function: (run result, expected output, policy) → verdict
///
/// **Classification Order:**
/// 1. Timed out → Fail(Timeout), regardless of what was printed
/// 2. Killed by a signal → Fail(Crash)
/// 3. Non-zero exit code → Fail(NonZeroExit)
/// 4. Output comparison → Pass or Fail(OutputMismatch)
///
/// **Normalization Rules (ComparisonPolicy::TrailingWhitespace):**
/// - Trim trailing whitespace on every line: YES (also removes \r)
/// - Drop trailing blank lines: YES
/// - Trim leading whitespace: NO
/// - Internal whitespace and line order: preserved
/// - Case sensitivity: YES (exact match required)
/// - Floating-point tolerance: NO
///
/// ComparisonPolicy::Exact compares bytes with no normalization at all.

use codejudge_common::config::ComparisonPolicy;
use codejudge_common::types::{ExitStatus, FailReason, RunResult, TestVerdict, Verdict};

/// Normalize output for comparison under the trailing-whitespace policy
fn normalize_output(output: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = output.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// Check whether actual output matches expected output under `policy`
pub fn outputs_match(actual: &str, expected: &str, policy: ComparisonPolicy) -> bool {
    match policy {
        ComparisonPolicy::Exact => actual == expected,
        ComparisonPolicy::TrailingWhitespace => normalize_output(actual) == normalize_output(expected),
    }
}

/// Assign a verdict to one test run
pub fn compare(actual: &RunResult, expected: &str, policy: ComparisonPolicy) -> Verdict {
    if actual.timed_out {
        return Verdict::Fail(FailReason::Timeout);
    }

    match actual.exit_status {
        ExitStatus::TimedOut => Verdict::Fail(FailReason::Timeout),
        ExitStatus::Signaled(_) => Verdict::Fail(FailReason::Crash),
        ExitStatus::Exited(code) if code != 0 => Verdict::Fail(FailReason::NonZeroExit),
        ExitStatus::Exited(_) => {
            if outputs_match(&actual.stdout, expected, policy) {
                Verdict::Pass
            } else {
                Verdict::Fail(FailReason::OutputMismatch)
            }
        }
    }
}

/// Count passing verdicts: (passed, total)
pub fn summarize(verdicts: &[TestVerdict]) -> (usize, usize) {
    let passed = verdicts.iter().filter(|v| v.verdict.is_pass()).count();
    (passed, verdicts.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to create a clean exit with the given stdout
    fn make_output(stdout: &str) -> RunResult {
        RunResult {
            exit_status: ExitStatus::Exited(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            elapsed_ms: 5,
            timed_out: false,
            output_truncated: false,
        }
    }

    fn trailing(actual: &str, expected: &str) -> Verdict {
        compare(&make_output(actual), expected, ComparisonPolicy::TrailingWhitespace)
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("hello"), vec!["hello"]);
        assert_eq!(normalize_output("hello  \n"), vec!["hello"]);
        assert_eq!(normalize_output("a\r\nb\r\n"), vec!["a", "b"]);
        assert_eq!(normalize_output("a\n\n\n"), vec!["a"]);
        assert_eq!(normalize_output("a\n\nb"), vec!["a", "", "b"]);
        assert_eq!(normalize_output("  indented"), vec!["  indented"]);
        assert!(normalize_output("").is_empty());
        assert!(normalize_output("   \n\n").is_empty());
    }

    #[test]
    fn test_exact_match() {
        assert_eq!(trailing("120", "120"), Verdict::Pass);
    }

    #[test]
    fn test_extra_trailing_blank_lines_pass() {
        let expected = "1 2 3\n4 5 6";
        let actual = format!("{}\n\n", expected);
        assert_eq!(trailing(&actual, expected), Verdict::Pass);
    }

    #[test]
    fn test_trailing_spaces_per_line_pass() {
        assert_eq!(trailing("a  \nb\t\n", "a\nb\n"), Verdict::Pass);
    }

    #[test]
    fn test_altered_internal_line_fails() {
        let expected = "line1\nline2\nline3";
        let actual = "line1\nLINE2\nline3";
        assert_eq!(trailing(actual, expected), Verdict::Fail(FailReason::OutputMismatch));
    }

    #[test]
    fn test_internal_whitespace_preserved() {
        assert_eq!(trailing("a  b", "a b"), Verdict::Fail(FailReason::OutputMismatch));
    }

    #[test]
    fn test_leading_whitespace_preserved() {
        assert_eq!(trailing("  hello", "hello"), Verdict::Fail(FailReason::OutputMismatch));
        assert_eq!(trailing("\nhello", "hello"), Verdict::Fail(FailReason::OutputMismatch));
    }

    #[test]
    fn test_line_order_matters() {
        assert_eq!(trailing("b\na", "a\nb"), Verdict::Fail(FailReason::OutputMismatch));
    }

    #[test]
    fn test_case_sensitivity() {
        assert_eq!(trailing("hello", "Hello"), Verdict::Fail(FailReason::OutputMismatch));
    }

    #[test]
    fn test_no_numeric_tolerance() {
        assert_eq!(trailing("3.140", "3.14"), Verdict::Fail(FailReason::OutputMismatch));
    }

    #[test]
    fn test_empty_output() {
        assert_eq!(trailing("   \n", ""), Verdict::Pass);
    }

    #[test]
    fn test_exact_policy() {
        let output = make_output("hello\n");
        assert_eq!(compare(&output, "hello\n", ComparisonPolicy::Exact), Verdict::Pass);
        assert_eq!(
            compare(&output, "hello", ComparisonPolicy::Exact),
            Verdict::Fail(FailReason::OutputMismatch)
        );
    }

    #[test]
    fn test_timeout_wins_over_correct_output() {
        let output = RunResult {
            exit_status: ExitStatus::TimedOut,
            stdout: "42".to_string(),
            stderr: String::new(),
            elapsed_ms: 2001,
            timed_out: true,
            output_truncated: false,
        };
        assert_eq!(
            compare(&output, "42", ComparisonPolicy::TrailingWhitespace),
            Verdict::Fail(FailReason::Timeout)
        );
    }

    #[test]
    fn test_crash() {
        let mut output = make_output("42");
        output.exit_status = ExitStatus::Signaled(11);
        assert_eq!(
            compare(&output, "42", ComparisonPolicy::TrailingWhitespace),
            Verdict::Fail(FailReason::Crash)
        );
    }

    #[test]
    fn test_nonzero_exit() {
        let mut output = make_output("42");
        output.exit_status = ExitStatus::Exited(1);
        assert_eq!(
            compare(&output, "42", ComparisonPolicy::TrailingWhitespace),
            Verdict::Fail(FailReason::NonZeroExit)
        );
    }

    #[test]
    fn test_summarize() {
        let verdicts = vec![
            TestVerdict { test_case: "a".to_string(), verdict: Verdict::Pass },
            TestVerdict { test_case: "b".to_string(), verdict: Verdict::Fail(FailReason::Crash) },
            TestVerdict { test_case: "c".to_string(), verdict: Verdict::Pass },
        ];
        assert_eq!(summarize(&verdicts), (2, 3));
        assert_eq!(summarize(&[]), (0, 0));
    }
}
