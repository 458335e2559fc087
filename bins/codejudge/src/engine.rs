/// Execution Engine - Runs Compiled Programs
///
/// **Core Responsibility:**
/// Execute a compiled artifact with one test input and capture raw output.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (local subprocess, pipes, deadlines)
/// - Engine does NOT compare output or assign verdicts
/// - Engine returns a RunResult for the Evaluator to judge
///
/// **Process Rules:**
/// 1. stdin, stdout and stderr are piped; input is written from a separate task
/// 2. stdout and stderr are read concurrently until exit or deadline
/// 3. On deadline the process is killed and reaped, partial output is kept
/// 4. On unix the child leads its own process group; the whole group is
///    killed once the run ends, so forked descendants never outlive it
/// 5. `kill_on_drop` guarantees the child dies if the future is dropped
/// 6. No retries: a timeout is the final result for that input

use crate::compiler::CompiledArtifact;
use crate::error::{JudgeError, JudgeResult};
use codejudge_common::types::{ExitStatus, RunResult};
use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to keep draining pipes after the process is gone.
/// Grandchildren may hold the pipe open; we stop waiting for them here.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Raw outcome of a process run under a deadline
#[derive(Debug)]
pub struct CapturedProcess {
    /// `None` when the deadline elapsed and the process was killed
    pub status: Option<std::process::ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// stdout and stderr interleaved in the order chunks arrived
    pub combined: Vec<u8>,
    pub elapsed: Duration,
    pub truncated: bool,
}

impl CapturedProcess {
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }
}

/// Bounded output buffers
struct OutputCapture {
    cap: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    combined: Vec<u8>,
    truncated: bool,
}

impl OutputCapture {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            stdout: Vec::new(),
            stderr: Vec::new(),
            combined: Vec::new(),
            truncated: false,
        }
    }

    fn push_stdout(&mut self, chunk: &[u8]) {
        self.truncated |= append_capped(&mut self.stdout, chunk, self.cap);
        self.truncated |= append_capped(&mut self.combined, chunk, self.cap);
    }

    fn push_stderr(&mut self, chunk: &[u8]) {
        self.truncated |= append_capped(&mut self.stderr, chunk, self.cap);
        self.truncated |= append_capped(&mut self.combined, chunk, self.cap);
    }
}

/// Append up to `cap` bytes total; returns true if anything was dropped
fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], cap: usize) -> bool {
    let room = cap.saturating_sub(buf.len());
    if chunk.len() <= room {
        buf.extend_from_slice(chunk);
        false
    } else {
        buf.extend_from_slice(&chunk[..room]);
        true
    }
}

/// Aborts the stdin writer task on every exit path
struct WriterGuard(JoinHandle<()>);

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Put the child in a fresh process group led by itself
#[cfg(unix)]
fn isolate_process_group(command: &mut Command) {
    use nix::unistd::{setpgid, Pid};
    // SAFETY: setpgid is async-signal-safe and touches no parent state
    unsafe {
        command.pre_exec(|| {
            setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(io::Error::from)
        });
    }
}

#[cfg(not(unix))]
fn isolate_process_group(_command: &mut Command) {}

/// SIGKILL every process left in the child's group
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Read both pipes to EOF
async fn drain<O, E>(stdout: &mut O, stderr: &mut E, capture: &mut OutputCapture)
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_chunk = [0u8; READ_CHUNK_BYTES];
    let mut err_chunk = [0u8; READ_CHUNK_BYTES];
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            read = stdout.read(&mut out_chunk), if stdout_open => match read {
                Ok(0) | Err(_) => stdout_open = false,
                Ok(n) => capture.push_stdout(&out_chunk[..n]),
            },
            read = stderr.read(&mut err_chunk), if stderr_open => match read {
                Ok(0) | Err(_) => stderr_open = false,
                Ok(n) => capture.push_stderr(&err_chunk[..n]),
            },
        }
    }
}

/// Spawn `command`, feed it `input`, and collect its output until it exits
/// or `limit` elapses.
///
/// Only spawn and wait failures are errors; a timeout is reported through
/// `CapturedProcess::status == None`. The child is always reaped and every
/// pipe closed before this returns.
pub async fn run_with_deadline(
    mut command: Command,
    input: Option<Vec<u8>>,
    limit: Duration,
    output_cap: usize,
) -> io::Result<CapturedProcess> {
    command
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    isolate_process_group(&mut command);

    let start = Instant::now();
    let mut child = command.spawn()?;
    let pid = child.id();

    let _writer = match (child.stdin.take(), input) {
        (Some(mut stdin), Some(bytes)) => Some(WriterGuard(tokio::spawn(async move {
            // The program may exit without consuming its input
            if let Err(e) = stdin.write_all(&bytes).await {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    debug!(error = %e, "Failed to write program input");
                }
            }
            let _ = stdin.shutdown().await;
        }))),
        _ => None,
    };

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdout was not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stderr was not captured"))?;

    let mut capture = OutputCapture::new(output_cap);
    let mut out_chunk = [0u8; READ_CHUNK_BYTES];
    let mut err_chunk = [0u8; READ_CHUNK_BYTES];
    let mut stdout_open = true;
    let mut stderr_open = true;

    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    let status = loop {
        tokio::select! {
            read = stdout.read(&mut out_chunk), if stdout_open => match read {
                Ok(0) | Err(_) => stdout_open = false,
                Ok(n) => capture.push_stdout(&out_chunk[..n]),
            },
            read = stderr.read(&mut err_chunk), if stderr_open => match read {
                Ok(0) | Err(_) => stderr_open = false,
                Ok(n) => capture.push_stderr(&err_chunk[..n]),
            },
            status = child.wait() => match status {
                Ok(status) => break Some(status),
                Err(e) => {
                    kill_process_group(pid);
                    return Err(e);
                }
            },
            _ = &mut deadline => break None,
        }
    };

    let elapsed = start.elapsed();

    // Descendants may still hold the pipes open or keep writing into the
    // working directory
    kill_process_group(pid);

    if status.is_none() {
        // kill() sends SIGKILL and reaps; it fails only if the child is already gone
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill process after deadline");
        }
    }

    if tokio::time::timeout(DRAIN_GRACE, drain(&mut stdout, &mut stderr, &mut capture))
        .await
        .is_err()
    {
        debug!("Output pipes still open after exit; discarding the rest");
    }

    Ok(CapturedProcess {
        status,
        stdout: capture.stdout,
        stderr: capture.stderr,
        combined: capture.combined,
        elapsed,
        truncated: capture.truncated,
    })
}

/// Map an OS exit status onto the report's exit status
pub fn classify_exit(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus::Exited(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitStatus::Signaled(signal);
        }
    }

    ExitStatus::Signaled(-1)
}

/// Local-process execution engine
///
/// Stateless apart from its limits; one instance is shared by every
/// evaluation and each `run` call is independent.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    max_output_bytes: usize,
}

impl ProcessEngine {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// Run the compiled artifact against one test input
    pub async fn run(
        &self,
        artifact: &CompiledArtifact,
        input: &str,
        time_limit: Duration,
    ) -> JudgeResult<RunResult> {
        let mut command = Command::new(artifact.path());
        command.current_dir(artifact.workdir());
        self.run_command(command, input, time_limit).await
    }

    /// Run an arbitrary prepared command under the engine's limits
    pub async fn run_command(
        &self,
        command: Command,
        input: &str,
        time_limit: Duration,
    ) -> JudgeResult<RunResult> {
        let program = format!("{:?}", command.as_std().get_program());
        let captured = run_with_deadline(
            command,
            Some(input.as_bytes().to_vec()),
            time_limit,
            self.max_output_bytes,
        )
        .await
        .map_err(|e| JudgeError::infrastructure(format!("Failed to execute {}", program), e))?;

        let timed_out = captured.timed_out();
        let exit_status = match captured.status {
            Some(status) => classify_exit(status),
            None => ExitStatus::TimedOut,
        };
        let elapsed_ms = captured.elapsed.as_millis() as u64;

        if timed_out {
            warn!(
                elapsed_ms = elapsed_ms,
                time_limit_ms = time_limit.as_millis() as u64,
                "Test execution timed out"
            );
        } else if !exit_status.is_success() {
            warn!(elapsed_ms = elapsed_ms, status = %exit_status, "Test execution failed");
        } else {
            debug!(elapsed_ms = elapsed_ms, "Test execution completed");
        }

        Ok(RunResult {
            exit_status,
            stdout: String::from_utf8_lossy(&captured.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&captured.stderr).into_owned(),
            elapsed_ms,
            timed_out,
            output_truncated: captured.truncated,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_append_capped() {
        let mut buf = Vec::new();
        assert!(!append_capped(&mut buf, b"abc", 5));
        assert!(append_capped(&mut buf, b"defg", 5));
        assert_eq!(buf, b"abcde");
        assert!(append_capped(&mut buf, b"h", 5));
        assert_eq!(buf, b"abcde");
    }

    #[tokio::test]
    async fn test_echo_input() {
        let engine = ProcessEngine::new(1024);
        let result = engine
            .run_command(sh("read n; echo $((n * 2))"), "21\n", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.exit_status, ExitStatus::Exited(0));
        assert_eq!(result.stdout, "42\n");
        assert!(!result.timed_out);
        assert!(!result.output_truncated);
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let engine = ProcessEngine::new(1024);
        let result = engine
            .run_command(sh("echo oops >&2; exit 3"), "", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.exit_status, ExitStatus::Exited(3));
        assert_eq!(result.stderr, "oops\n");
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_signal_is_crash() {
        let engine = ProcessEngine::new(1024);
        let result = engine
            .run_command(sh("kill -SEGV $$"), "", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.exit_status, ExitStatus::Signaled(11));
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let engine = ProcessEngine::new(1024);
        let start = Instant::now();
        let result = engine
            .run_command(
                sh("echo partial; while :; do :; done"),
                "",
                Duration::from_millis(300),
            )
            .await
            .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.exit_status, ExitStatus::TimedOut);
        assert_eq!(result.stdout, "partial\n");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_program_ignoring_large_input() {
        let engine = ProcessEngine::new(1024);
        let input = "x".repeat(1024 * 1024);
        let result = engine
            .run_command(sh("echo done"), &input, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(result.exit_status, ExitStatus::Exited(0));
        assert_eq!(result.stdout, "done\n");
    }

    #[tokio::test]
    async fn test_output_truncated_at_cap() {
        let engine = ProcessEngine::new(16);
        let result = engine
            .run_command(
                sh("i=0; while [ $i -lt 100 ]; do echo line$i; i=$((i + 1)); done"),
                "",
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(result.exit_status, ExitStatus::Exited(0));
        assert_eq!(result.stdout.len(), 16);
        assert!(result.output_truncated);
    }

    #[tokio::test]
    async fn test_missing_program_is_infrastructure_error() {
        let engine = ProcessEngine::new(1024);
        let result = engine
            .run_command(
                Command::new("/nonexistent/codejudge-program"),
                "",
                Duration::from_secs(1),
            )
            .await;

        assert!(matches!(result, Err(JudgeError::Infrastructure { .. })));
    }

    /// Poll until `pid` is dead; an unreaped zombie counts as dead
    async fn wait_until_gone(pid: i32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        for _ in 0..40 {
            if kill(Pid::from_raw(pid), None).is_err() {
                return true;
            }
            let zombie = std::fs::read_to_string(format!("/proc/{}/stat", pid))
                .map(|stat| stat.contains(") Z "))
                .unwrap_or(false);
            if zombie {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    fn background_pid(stdout: &[u8]) -> i32 {
        String::from_utf8_lossy(stdout)
            .lines()
            .next()
            .and_then(|line| line.trim().parse().ok())
            .expect("script should print the background pid")
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let captured = run_with_deadline(
            sh("sleep 7777 & echo $!; wait"),
            None,
            Duration::from_millis(300),
            1024,
        )
        .await
        .unwrap();

        assert!(captured.timed_out());

        let pid = background_pid(&captured.stdout);
        assert!(wait_until_gone(pid).await, "background child {} survived", pid);
    }

    #[tokio::test]
    async fn test_exit_kills_leftover_children() {
        let captured = run_with_deadline(
            sh("sleep 7778 & echo $!"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .await
        .unwrap();

        assert!(!captured.timed_out());
        let pid = background_pid(&captured.stdout);
        assert!(wait_until_gone(pid).await, "leftover child {} survived", pid);
    }

    #[tokio::test]
    async fn test_writer_guard_aborts_task() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let guard = WriterGuard(tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        }));

        drop(guard);
        // The sender is dropped once the aborted task is torn down
        let result = tokio::time::timeout(Duration::from_secs(2), rx).await;
        assert!(matches!(result, Ok(Err(_))));
    }

    #[tokio::test]
    async fn test_combined_output_preserves_order() {
        let captured = run_with_deadline(
            sh("echo first; sleep 0.1; echo second >&2; sleep 0.1; echo third"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .await
        .unwrap();

        assert!(!captured.timed_out());
        assert_eq!(
            String::from_utf8_lossy(&captured.combined),
            "first\nsecond\nthird\n"
        );
    }
}
