//! Bounded execution of a single external command.
//!
//! Each call spawns exactly one child process, captures stdout and stderr
//! separately, and classifies the outcome. The child is killed when the
//! timeout elapses or the caller's cancellation token fires, and
//! `kill_on_drop` covers the case where the calling future itself is dropped.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Success text substituted when a command exits cleanly without output.
pub const NO_OUTPUT_PLACEHOLDER: &str = "Command executed successfully with no output";

/// Classified failure of a command execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("{command} exited with code {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("{command} command timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("{command} execution failed: {message}\nstderr: {stderr}")]
    Failed {
        command: String,
        message: String,
        stderr: String,
    },

    #[error("{command} execution cancelled")]
    Cancelled { command: String },
}

impl ExecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }
}

enum Finish {
    Exited(std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)>),
    TimedOut,
    Cancelled,
}

/// Runs external commands with a wall-clock budget. Holds no state between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `command` with `args`, returning captured stdout on a zero exit.
    ///
    /// Never retries. Empty (or whitespace-only) stdout yields
    /// [`NO_OUTPUT_PLACEHOLDER`]; otherwise trailing whitespace is trimmed.
    pub async fn execute(
        &self,
        command: &str,
        args: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, ExecError> {
        info!(command = %command, args = %args.join(" "), "executing command");

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                warn!(command = %command, error = %e, "failed to spawn command");
                ExecError::Failed {
                    command: command.to_string(),
                    message: e.to_string(),
                    stderr: String::new(),
                }
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finish = {
            let collect = async {
                tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
            };
            tokio::select! {
                result = collect => Finish::Exited(result),
                _ = tokio::time::sleep(timeout) => Finish::TimedOut,
                _ = cancel.cancelled() => Finish::Cancelled,
            }
        };

        match finish {
            Finish::Exited(Ok((status, out, err))) => classify(command, status, &out, &err),
            Finish::Exited(Err(e)) => {
                kill(command, &mut child).await;
                warn!(command = %command, error = %e, "failed while waiting for command");
                Err(ExecError::Failed {
                    command: command.to_string(),
                    message: e.to_string(),
                    stderr: String::new(),
                })
            }
            Finish::TimedOut => {
                kill(command, &mut child).await;
                warn!(command = %command, timeout_secs = timeout.as_secs_f64(), "command timed out");
                Err(ExecError::Timeout {
                    command: command.to_string(),
                    timeout,
                })
            }
            Finish::Cancelled => {
                kill(command, &mut child).await;
                warn!(command = %command, "command cancelled");
                Err(ExecError::Cancelled {
                    command: command.to_string(),
                })
            }
        }
    }
}

fn classify(
    command: &str,
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<String, ExecError> {
    let stderr = String::from_utf8_lossy(stderr).into_owned();

    if status.success() {
        let stdout = String::from_utf8_lossy(stdout);
        let trimmed = stdout.trim_end();
        if trimmed.is_empty() {
            return Ok(NO_OUTPUT_PLACEHOLDER.to_string());
        }
        return Ok(trimmed.to_string());
    }

    match status.code() {
        Some(code) => {
            warn!(command = %command, exit_code = code, stderr = %stderr, "command exited non-zero");
            Err(ExecError::NonZeroExit {
                command: command.to_string(),
                code,
                stderr,
            })
        }
        // No exit code means the process was terminated by a signal.
        None => {
            warn!(command = %command, status = %status, "command terminated abnormally");
            Err(ExecError::Failed {
                command: command.to_string(),
                message: status.to_string(),
                stderr,
            })
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

async fn kill(command: &str, child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(command = %command, error = %e, "kill failed (process may have already exited)");
    }
}
