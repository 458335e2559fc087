/// Compiler Invoker
///
/// **Core Responsibility:**
/// Turn one source text into an executable artifact or a compiler diagnostic.
///
/// **Resource Rules:**
/// - Every compilation gets its own temporary build workspace
/// - The workspace is owned by the returned `CompiledArtifact` (or dropped
///   right here on failure), so it is removed on every exit path
/// - Compiler errors are values (`CompileResult::Failure`), only tooling
///   failures are `JudgeError`s

use crate::engine::run_with_deadline;
use crate::error::{JudgeError, JudgeResult};
use codejudge_common::config::CompilerConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

const SOURCE_FILE_NAME: &str = "main.cpp";
const ARTIFACT_FILE_NAME: &str = "program";

/// Compiled executable plus the scratch directory it lives in
///
/// Dropping the artifact deletes the directory.
#[derive(Debug)]
pub struct CompiledArtifact {
    workspace: TempDir,
    path: PathBuf,
}

impl CompiledArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn workdir(&self) -> &Path {
        self.workspace.path()
    }
}

#[derive(Debug)]
pub enum CompileResult {
    Success(CompiledArtifact),
    Failure { diagnostic: String },
}

/// Invokes an external C++ compiler with a fixed flag set
#[derive(Debug, Clone)]
pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Full argument list for one compilation: flags, output, then source
    fn arguments(&self, source: &Path, output: &Path) -> Vec<String> {
        let mut args = self.config.flags.clone();
        args.push("-o".to_string());
        args.push(output.to_string_lossy().into_owned());
        args.push(source.to_string_lossy().into_owned());
        args
    }

    #[tracing::instrument(skip(self, source), fields(compiler = %self.config.program, source_bytes = source.len()))]
    pub async fn compile(&self, source: &str) -> JudgeResult<CompileResult> {
        if source.len() > self.config.max_source_bytes {
            return Ok(CompileResult::Failure {
                diagnostic: format!(
                    "source file is {} bytes, exceeding the {} byte limit",
                    source.len(),
                    self.config.max_source_bytes
                ),
            });
        }

        let workspace = tempfile::Builder::new()
            .prefix("codejudge-")
            .tempdir()
            .map_err(|e| JudgeError::infrastructure("Failed to create build workspace", e))?;

        let source_path = workspace.path().join(SOURCE_FILE_NAME);
        let artifact_path = workspace.path().join(ARTIFACT_FILE_NAME);

        tokio::fs::write(&source_path, source)
            .await
            .map_err(|e| JudgeError::infrastructure("Failed to write source file", e))?;

        let mut command = Command::new(&self.config.program);
        command
            .args(self.arguments(&source_path, &artifact_path))
            .current_dir(workspace.path());

        let timeout = Duration::from_millis(self.config.timeout_ms);
        debug!(timeout_ms = self.config.timeout_ms, "Starting compilation");

        let captured = run_with_deadline(command, None, timeout, usize::MAX)
            .await
            .map_err(|e| {
                JudgeError::infrastructure(
                    format!("Failed to run compiler '{}'", self.config.program),
                    e,
                )
            })?;

        let compilation_time_ms = captured.elapsed.as_millis() as u64;
        let diagnostic = String::from_utf8_lossy(&captured.combined).into_owned();

        match captured.status {
            None => {
                warn!(compilation_time_ms, "Compilation timed out");
                Ok(CompileResult::Failure {
                    diagnostic: format!(
                        "{}compilation exceeded the time limit of {}ms",
                        diagnostic, self.config.timeout_ms
                    ),
                })
            }
            Some(status) if status.success() => {
                let produced = tokio::fs::metadata(&artifact_path)
                    .await
                    .map(|meta| meta.is_file())
                    .unwrap_or(false);
                if !produced {
                    return Err(JudgeError::infrastructure(
                        "Compiler reported success but produced no executable",
                        std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            artifact_path.display().to_string(),
                        ),
                    ));
                }
                info!(compilation_time_ms, "Compilation succeeded");
                Ok(CompileResult::Success(CompiledArtifact {
                    workspace,
                    path: artifact_path,
                }))
            }
            Some(status) => {
                warn!(
                    compilation_time_ms,
                    exit_code = status.code(),
                    error_preview = diagnostic.lines().next().unwrap_or(""),
                    "Compilation failed"
                );
                Ok(CompileResult::Failure { diagnostic })
            }
        }
    }
}
