// SPDX-License-Identifier: MIT
//! Execution engine — runs a task's command in an isolated child process.
//!
//! The one place in the daemon with real resource management: a process
//! handle, two pipes, and a timeout timer. `kill_on_drop` guarantees the
//! child is reaped on every exit path, including cancellation.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

/// Read buffer granularity. Capture stops growing at the configured cap but
/// the pipe keeps draining so the child never blocks on a full pipe.
const READ_CHUNK: usize = 8 * 1024;

/// How long to keep draining the pipes after the shell itself has exited.
/// A surviving grandchild can hold the write end open indefinitely.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// What a completed run produced. A non-zero exit status is still an
/// outcome — a failing command is not an engine error.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("command timed out after {timeout_secs}s")]
    Timeout {
        timeout_secs: u64,
        /// Output collected before the child was killed.
        partial_output: String,
        started_at: DateTime<Utc>,
    },
}

/// Seam for tests: the service depends on this trait, not on `sh`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<RunOutcome, ExecutionError>;
}

/// Real runner: `sh -c <command>`, stdout+stderr captured up to a cap,
/// bounded by a wall-clock timeout.
pub struct ShellRunner {
    timeout: Duration,
    max_output_bytes: usize,
}

impl ShellRunner {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<RunOutcome, ExecutionError> {
        let started_at = Utc::now();

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let cap = self.max_output_bytes;
        let stdout_buf = SharedCapture::default();
        let stderr_buf = SharedCapture::default();
        let mut out_reader = tokio::spawn(read_capped(child.stdout.take(), cap, stdout_buf.clone()));
        let mut err_reader = tokio::spawn(read_capped(child.stderr.take(), cap, stderr_buf.clone()));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                child.start_kill().ok();
                let _ = child.wait().await;
                None
            }
        };

        // Readers normally finish the moment the child exits; bound the drain
        // so a grandchild holding the pipes open cannot stall the request.
        let _ = tokio::time::timeout(PIPE_DRAIN_GRACE, async {
            let _ = (&mut out_reader).await;
            let _ = (&mut err_reader).await;
        })
        .await;
        out_reader.abort();
        err_reader.abort();

        let stdout_cap = stdout_buf.snapshot();
        let stderr_cap = stderr_buf.snapshot();
        if stdout_cap.truncated || stderr_cap.truncated {
            debug!(cap, "command output truncated at capture cap");
        }
        let output = combine(stdout_cap, stderr_cap, cap);

        match status {
            Some(status) => Ok(RunOutcome {
                exit_code: status.code().unwrap_or(-1),
                output,
                started_at,
                finished_at: Utc::now(),
            }),
            None => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "command killed on timeout"
                );
                Err(ExecutionError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                    partial_output: output,
                    started_at,
                })
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Capture {
    text: String,
    truncated: bool,
}

/// Capture buffer shared between the reader task and the request path, so the
/// partial text survives even when the reader is still blocked on an open pipe.
#[derive(Debug, Default, Clone)]
struct SharedCapture(Arc<Mutex<Capture>>);

impl SharedCapture {
    fn snapshot(&self) -> Capture {
        match self.0.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Drain a pipe to EOF, keeping at most `cap` bytes of lossy UTF-8.
async fn read_capped(stream: Option<impl AsyncRead + Unpin>, cap: usize, buf: SharedCapture) {
    let Some(mut stream) = stream else {
        return;
    };
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut capture = match buf.0.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if capture.text.len() < cap {
                    capture.text.push_str(&String::from_utf8_lossy(&chunk[..n]));
                } else {
                    capture.truncated = true;
                }
            }
        }
    }
}

/// Merge stdout then stderr into one capped text blob.
fn combine(stdout: Capture, stderr: Capture, cap: usize) -> String {
    let mut output = stdout.text;
    if !stderr.text.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&stderr.text);
    }
    if output.len() > cap + READ_CHUNK {
        let mut cut = cap;
        while !output.is_char_boundary(cut) {
            cut -= 1;
        }
        output.truncate(cut);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ShellRunner {
        ShellRunner::new(Duration::from_secs(10), 64 * 1024)
    }

    #[tokio::test]
    async fn captures_stdout() {
        let outcome = runner().run("echo Hello").await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.output.contains("Hello"));
        assert!(outcome.finished_at >= outcome.started_at);
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_outcome_not_an_error() {
        let outcome = runner().run("echo oops >&2; exit 3").await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.output.contains("oops"));
    }

    #[tokio::test]
    async fn combines_stdout_then_stderr() {
        let outcome = runner().run("echo first; echo second >&2").await.unwrap();
        let first = outcome.output.find("first").unwrap();
        let second = outcome.output.find("second").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn timeout_kills_child_and_keeps_partial_output() {
        let fast = ShellRunner::new(Duration::from_secs(1), 64 * 1024);
        let err = fast.run("echo started; sleep 30").await.unwrap_err();
        match err {
            ExecutionError::Timeout {
                partial_output,
                timeout_secs,
                ..
            } => {
                assert!(partial_output.contains("started"));
                assert_eq!(timeout_secs, 1);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_output_is_truncated_not_an_error() {
        let small = ShellRunner::new(Duration::from_secs(10), 1024);
        let outcome = small
            .run("head -c 100000 /dev/zero | tr '\\0' 'a'")
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.output.len() < 100_000);
    }
}
