// Grader configuration
// Everything the pipeline needs is passed in through JudgeConfig; nothing
// below the entry point reads environment variables.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/judge.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub program: String,
    pub flags: Vec<String>,
    pub timeout_ms: u64,
    pub max_source_bytes: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "g++".to_string(),
            flags: vec!["-std=c++17".to_string(), "-O2".to_string(), "-pipe".to_string()],
            timeout_ms: 30_000,
            max_source_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub time_limit_ms: u64,
    pub max_output_bytes: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            time_limit_ms: 2_000,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Output comparison policy
///
/// `TrailingWhitespace` trims trailing whitespace on every line and drops
/// trailing blank lines before comparing. `Exact` compares bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonPolicy {
    #[default]
    TrailingWhitespace,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo-0125".to_string(),
            timeout_ms: 30_000,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub compiler: CompilerConfig,
    pub run: RunConfig,
    pub comparison: ComparisonPolicy,
    pub feedback: FeedbackConfig,
    pub max_parallel_submissions: usize,
    pub default_assignment: String,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            compiler: CompilerConfig::default(),
            run: RunConfig::default(),
            comparison: ComparisonPolicy::default(),
            feedback: FeedbackConfig::default(),
            max_parallel_submissions: 4,
            default_assignment: "assignment".to_string(),
        }
    }
}

impl JudgeConfig {
    /// Load configuration from a JSON file; absent keys take their defaults
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Judge config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: JudgeConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would make every evaluation fail or hang
    pub fn validate(&self) -> Result<()> {
        if self.compiler.program.trim().is_empty() {
            bail!("compiler.program must not be empty");
        }
        if self.compiler.timeout_ms == 0 {
            bail!("compiler.timeout_ms must be greater than zero");
        }
        if self.run.time_limit_ms == 0 {
            bail!("run.time_limit_ms must be greater than zero");
        }
        if self.run.max_output_bytes == 0 {
            bail!("run.max_output_bytes must be greater than zero");
        }
        if self.feedback.timeout_ms == 0 {
            bail!("feedback.timeout_ms must be greater than zero");
        }
        if self.max_parallel_submissions == 0 {
            bail!("max_parallel_submissions must be at least 1");
        }
        Ok(())
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compiler.timeout_ms)
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.run.time_limit_ms)
    }

    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_millis(self.feedback.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: JudgeConfig = serde_json::from_str(
            r#"{ "run": { "time_limit_ms": 500 }, "comparison": "exact" }"#,
        )
        .unwrap();

        assert_eq!(config.run.time_limit_ms, 500);
        assert_eq!(config.run.max_output_bytes, 1024 * 1024);
        assert_eq!(config.comparison, ComparisonPolicy::Exact);
        assert_eq!(config.compiler.program, "g++");
        assert_eq!(config.max_parallel_submissions, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_api_key_never_serialized() {
        let mut config = JudgeConfig::default();
        config.feedback.api_key = Some("sk-secret".to_string());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = JudgeConfig::default();
        config.run.time_limit_ms = 0;
        assert!(config.validate().is_err());

        let mut config = JudgeConfig::default();
        config.max_parallel_submissions = 0;
        assert!(config.validate().is_err());

        let mut config = JudgeConfig::default();
        config.compiler.program = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = JudgeConfig::load(Path::new("does/not/exist.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_durations() {
        let config = JudgeConfig::default();
        assert_eq!(config.time_limit(), Duration::from_secs(2));
        assert_eq!(config.compile_timeout(), Duration::from_secs(30));
        assert_eq!(config.feedback_timeout(), Duration::from_secs(30));
    }
}
