//! Executor that runs commands as local child processes.

use async_trait::async_trait;
use chrono::Utc;
use curasync_core::executor::{CommandResult, CommandSpec, Executor, LogLine, LogStream};
use curasync_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

// Only the head of stdout is kept for inspection; the full output is streamed.
const MAX_CAPTURED_STDOUT: usize = 64 * 1024;

/// Runs commands on the host, inheriting the runner's environment.
#[derive(Debug, Default, Clone)]
pub struct LocalProcessExecutor;

impl LocalProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for LocalProcessExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, spec: CommandSpec, logs: mpsc::Sender<LogLine>) -> Result<CommandResult> {
        let started_at = Utc::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        info!(program = %spec.program, args = spec.args.len(), "Spawning process");

        let mut child = command.spawn().map_err(|e| {
            Error::ExecutionFailed(format!("failed to start '{}': {}", spec.program, e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("child stderr not captured".to_string()))?;

        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut captured = String::new();

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout_reader.next_line(), if stdout_open => {
                    match line.map_err(io_error)? {
                        Some(line) => {
                            if captured.len() < MAX_CAPTURED_STDOUT {
                                captured.push_str(&line);
                                captured.push('\n');
                            }
                            send_line(&logs, LogStream::Stdout, line).await;
                        }
                        None => stdout_open = false,
                    }
                }
                line = stderr_reader.next_line(), if stderr_open => {
                    match line.map_err(io_error)? {
                        Some(line) => send_line(&logs, LogStream::Stderr, line).await,
                        None => stderr_open = false,
                    }
                }
            }
        }

        let status = child.wait().await.map_err(io_error)?;
        debug!(program = %spec.program, ?status, "Process exited");

        Ok(CommandResult {
            exit_code: status.code(),
            stdout: captured,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

async fn send_line(logs: &mpsc::Sender<LogLine>, stream: LogStream, content: String) {
    let _ = logs
        .send(LogLine {
            timestamp: Utc::now(),
            stream,
            content,
        })
        .await;
}

fn io_error(err: std::io::Error) -> Error {
    Error::ExecutionFailed(err.to_string())
}
