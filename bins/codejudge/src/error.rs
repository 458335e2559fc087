use std::io;
use thiserror::Error;

/// Failures of the grader itself, as opposed to failures of the submission
///
/// Compile errors, wrong answers, crashes and timeouts are verdicts and never
/// show up here.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("{context}: {source}")]
    Infrastructure {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl JudgeError {
    pub fn infrastructure(context: impl Into<String>, source: io::Error) -> Self {
        JudgeError::Infrastructure {
            context: context.into(),
            source,
        }
    }
}

pub type JudgeResult<T> = std::result::Result<T, JudgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_message() {
        let err = JudgeError::infrastructure(
            "Failed to spawn compiler 'g++'",
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to spawn compiler 'g++': No such file or directory"
        );
    }
}
