use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::app::error::BackendError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Converts a non-zero exit into a backend failure naming the action.
    pub fn ensure_success(self, backend: &str, action: &str) -> Result<Self, BackendError> {
        if self.success() {
            return Ok(self);
        }
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(BackendError::new(
            backend,
            format!("{action} failed (exit {:?}): {detail}", self.exit_code),
        ))
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("failed to collect output of {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

impl RunError {
    pub fn into_backend(self, backend: &str) -> BackendError {
        BackendError::new(backend, self.to_string())
    }
}

/// Runs `program` to completion, killing it when `timeout` elapses.
///
/// Output pipes are drained concurrently with the wait so a chatty child never
/// blocks on a full pipe buffer.
pub async fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, RunError> {
    let started = Instant::now();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RunError::Spawn {
            program: program.to_string(),
            source,
        })?;

    // Dropping the timed-out future drops the child, and kill_on_drop reaps it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| RunError::Io {
            program: program.to_string(),
            source,
        })?,
        Err(_) => {
            return Err(RunError::Timeout {
                program: program.to_string(),
                timeout,
            })
        }
    };

    debug!(
        trace_id = %trace_id,
        program = %program,
        args = ?args,
        exit_code = ?output.status.code(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "command finished"
    );

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
    })
}

pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_command_with_timeout_does_not_deadlock_on_large_stdout() {
        if cfg!(windows) {
            return;
        }
        let script = args([
            "-c",
            "i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done",
        ]);
        let output = run_command_with_timeout("sh", &script, Duration::from_secs(10), "trace-large")
            .await
            .expect("expected large-output command to complete without timing out");

        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.len() >= 1_000_000);
    }

    #[tokio::test]
    async fn run_command_with_timeout_kills_slow_commands() {
        if cfg!(windows) {
            return;
        }
        let err = run_command_with_timeout(
            "sh",
            &args(["-c", "sleep 5"]),
            Duration::from_millis(100),
            "trace-slow",
        )
        .await
        .expect_err("expected timeout");
        assert!(matches!(err, RunError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_program_reports_spawn_error() {
        let err = run_command_with_timeout(
            "/this/tool/does/not/exist",
            &[],
            Duration::from_secs(1),
            "trace-missing",
        )
        .await
        .expect_err("expected spawn error");
        assert!(matches!(err, RunError::Spawn { .. }));
        assert!(err.into_backend("simctl").message.contains("failed to spawn"));
    }

    #[test]
    fn ensure_success_prefers_stderr_detail() {
        let output = CommandOutput {
            stdout: "noise".to_string(),
            stderr: "Invalid device: X".to_string(),
            exit_code: Some(164),
        };
        let err = output.ensure_success("simctl", "boot").expect_err("non-zero exit");
        assert_eq!(err.backend, "simctl");
        assert!(err.message.contains("Invalid device: X"));
    }
}
