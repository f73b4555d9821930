//! Process back end boundary.
//!
//! Strategies never spawn programs themselves; they hand a [`ProcessRequest`]
//! to a [`ProcessExecutor`] and consume the classified outcome. OS-level
//! isolation and precise memory accounting belong to the executor.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use agora_common::{JudgeError, JudgeResult, ProcessExecutionResult, ProcessOutcome};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};

/// One program run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: String,
    pub time_limit_ms: u64,
    pub memory_limit_bytes: u64,
    pub working_dir: Option<PathBuf>,
    /// Restricted profile: empty environment, no inherited variables
    pub restricted: bool,
}

impl ProcessRequest {
    pub fn new(program: impl Into<PathBuf>, time_limit_ms: u64, memory_limit_bytes: u64) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: String::new(),
            time_limit_ms,
            memory_limit_bytes,
            working_dir: None,
            restricted: true,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn unrestricted(mut self) -> Self {
        self.restricted = false;
        self
    }
}

/// Runs one program under time/memory limits.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn execute(&self, request: ProcessRequest) -> JudgeResult<ProcessExecutionResult>;
}

/// Grace period on top of the time limit before the child is killed
const KILL_GRACE_MS: u64 = 100;

/// Cap on captured output per stream
const MAX_CAPTURED_BYTES: usize = 16 * 1024 * 1024;

/// Executor backed by `tokio::process`.
///
/// Enforces the wall-clock limit only; memory is not measured and reported as 0.
#[derive(Debug, Clone, Default)]
pub struct LocalProcessExecutor;

#[async_trait]
impl ProcessExecutor for LocalProcessExecutor {
    async fn execute(&self, request: ProcessRequest) -> JudgeResult<ProcessExecutionResult> {
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &request.working_dir {
            command.current_dir(dir);
        }
        if request.restricted {
            command.env_clear().env("PATH", "/usr/local/bin:/usr/bin:/bin");
        }

        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            JudgeError::Process(format!(
                "Failed to start {}: {}",
                request.program.display(),
                e
            ))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = request.stdin.into_bytes();
            tokio::spawn(async move {
                // The child may exit without reading its input
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            });
        }

        let stdout = child.stdout.take().map(|stream| tokio::spawn(capture(stream)));
        let stderr = child.stderr.take().map(|stream| tokio::spawn(capture(stream)));

        let limit = Duration::from_millis(request.time_limit_ms + KILL_GRACE_MS);
        let finished = timeout(limit, async {
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, collected(stdout).await, collected(stderr).await))
        })
        .await;

        let (status, stdout, stderr) = match finished {
            Ok(Ok(finished)) => finished,
            Ok(Err(e)) => return Err(JudgeError::Process(format!("Failed to wait for process: {e}"))),
            Err(_) => {
                let _ = child.start_kill();
                return Ok(ProcessExecutionResult::failure(
                    ProcessOutcome::TimeLimitExceeded,
                    "",
                    request.time_limit_ms,
                ));
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let outcome = if elapsed_ms > request.time_limit_ms {
            ProcessOutcome::TimeLimitExceeded
        } else if status.success() {
            ProcessOutcome::Success
        } else {
            ProcessOutcome::RuntimeError
        };

        let stderr = match (outcome, signal_of(&status)) {
            (ProcessOutcome::RuntimeError, Some(signal)) if stderr.is_empty() => {
                format!("Killed by signal {signal}")
            }
            _ => stderr,
        };

        Ok(ProcessExecutionResult {
            outcome,
            stdout,
            stderr,
            time_used_ms: elapsed_ms,
            memory_used_bytes: 0,
            exit_code: status.code(),
        })
    }
}

/// Keep the first [`MAX_CAPTURED_BYTES`] of a stream and discard the rest,
/// reading to the end so the child never blocks on a full pipe
async fn capture<R: AsyncRead + Unpin>(mut stream: R) -> Vec<u8> {
    let mut captured = Vec::new();
    let _ = (&mut stream)
        .take(MAX_CAPTURED_BYTES as u64)
        .read_to_end(&mut captured)
        .await;
    let _ = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await;
    captured
}

async fn collected(task: Option<JoinHandle<Vec<u8>>>) -> String {
    match task {
        Some(task) => String::from_utf8_lossy(&task.await.unwrap_or_default()).into_owned(),
        None => String::new(),
    }
}

#[cfg(unix)]
fn signal_of(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let request = ProcessRequest::new("/bin/cat", 2_000, 0).stdin("hello\n");
        let result = LocalProcessExecutor.execute(request).await.unwrap();

        assert_eq!(result.outcome, ProcessOutcome::Success);
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.memory_used_bytes, 0);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_runtime_error() {
        let request = ProcessRequest::new("/bin/sh", 2_000, 0).args(["-c", "echo boom >&2; exit 3"]);
        let result = LocalProcessExecutor.execute(request).await.unwrap();

        assert_eq!(result.outcome, ProcessOutcome::RuntimeError);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn test_time_limit() {
        let request = ProcessRequest::new("/bin/sleep", 100, 0).args(["5"]);
        let result = LocalProcessExecutor.execute(request).await.unwrap();
        assert_eq!(result.outcome, ProcessOutcome::TimeLimitExceeded);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let request = ProcessRequest::new("/nonexistent/agora-binary", 100, 0);
        let err = LocalProcessExecutor.execute(request).await.unwrap_err();
        assert_eq!(err.error_code(), "PROCESS_ERROR");
    }

    #[tokio::test]
    async fn test_output_is_capped_while_draining() {
        let request = ProcessRequest::new("/bin/sh", 10_000, 0)
            .args(["-c", "head -c 20000000 /dev/zero; echo done >&2"]);
        let result = LocalProcessExecutor.execute(request).await.unwrap();

        assert_eq!(result.outcome, ProcessOutcome::Success);
        assert_eq!(result.stdout.len(), MAX_CAPTURED_BYTES);
        assert_eq!(result.stderr.trim(), "done");
    }
}
