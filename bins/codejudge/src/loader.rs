// Source loader
// Reads submissions and test case directories from disk. Directory listings
// are sorted so that every run sees the same order.

use anyhow::{Context, Result};
use codejudge_common::types::{Submission, SubmissionId, TestCase};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SOURCE_EXTENSIONS: &[&str] = &["cpp", "cc", "cxx", "c++"];
pub const INPUT_FILE: &str = "input.txt";
pub const EXPECTED_OUTPUT_FILE: &str = "expected_output.txt";

/// Split a file stem of the form `<student>_<assignment>`
///
/// The split happens at the last underscore so student names may contain
/// underscores themselves. A stem without one belongs to `default_assignment`.
pub fn parse_submission_id(stem: &str, default_assignment: &str) -> SubmissionId {
    match stem.rsplit_once('_') {
        Some((student, assignment)) if !student.is_empty() && !assignment.is_empty() => {
            SubmissionId {
                student: student.to_string(),
                assignment: assignment.to_string(),
            }
        }
        _ => SubmissionId {
            student: stem.to_string(),
            assignment: default_assignment.to_string(),
        },
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to list directory {}", dir.display()))?;
    paths.sort();
    Ok(paths)
}

fn is_source_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

/// Load every C++ source file in `dir`, sorted by file name
pub fn load_submissions(dir: &Path, default_assignment: &str) -> Result<Vec<Submission>> {
    let mut submissions = Vec::new();

    for path in sorted_entries(dir)? {
        if !is_source_file(&path) {
            debug!(path = %path.display(), "Skipping non-source entry");
            continue;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let source = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read submission {}", path.display()))?;

        submissions.push(Submission {
            id: parse_submission_id(&stem, default_assignment),
            file_name,
            source,
        });
    }

    Ok(submissions)
}

/// Load every test case directory in `dir`, sorted by directory name
///
/// A directory missing its input or expected output file is skipped with a
/// warning rather than failing the whole batch.
pub fn load_test_cases(dir: &Path) -> Result<Vec<TestCase>> {
    let mut test_cases = Vec::new();

    for path in sorted_entries(dir)? {
        if !path.is_dir() {
            continue;
        }

        let input_path = path.join(INPUT_FILE);
        let expected_path = path.join(EXPECTED_OUTPUT_FILE);
        if !input_path.is_file() || !expected_path.is_file() {
            warn!(
                test_case = %path.display(),
                "Skipping test case without {} and {}",
                INPUT_FILE,
                EXPECTED_OUTPUT_FILE
            );
            continue;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let input = fs::read_to_string(&input_path)
            .with_context(|| format!("Failed to read {}", input_path.display()))?;
        let expected_output = fs::read_to_string(&expected_path)
            .with_context(|| format!("Failed to read {}", expected_path.display()))?;

        test_cases.push(TestCase {
            name,
            input,
            expected_output,
        });
    }

    Ok(test_cases)
}
