//! Shell-command executor.
//!
//! Runs a command under `sh -c`, streams its stdout into the operation's
//! partial result line by line, and kills the child when cancelled.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{Executor, ExecutorError, ProgressReporter};

/// Output kept per stream; older stdout is dropped first.
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Commands refused outright.
static BLOCKED_PATTERNS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    vec![
        "rm -rf /",
        "rm -rf /*",
        ":(){ :|:& };:",
        "dd if=/dev/zero",
        "mkfs",
        "> /dev/sda",
        "chmod -r 777 /",
    ]
});

/// A shell command run as an operation.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    command: String,
    working_dir: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn spawn(&self) -> Result<Child, ExecutorError> {
        if is_blocked(&self.command) {
            return Err(ExecutorError::failed(format!(
                "Command contains blocked pattern: {}",
                truncate_for_error(&self.command)
            )));
        }

        let mut command = Command::new("sh");
        command
            .args(["-c", &self.command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        command
            .spawn()
            .map_err(|e| ExecutorError::failed(format!("Failed to spawn command: {e}")))
    }
}

#[async_trait]
impl Executor for ShellCommand {
    async fn run(
        self: Box<Self>,
        reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutorError> {
        let mut child = self.spawn()?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(ExecutorError::failed("Command output was not captured"));
        };
        let stderr_task = tokio::spawn(read_capped(stderr));

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut output = String::new();
        loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                read = reader.read_until(b'\n', &mut buf) => Some(read),
            };
            let Some(read) = read else {
                return Err(stop(&mut child).await);
            };
            match read {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    append_line(&mut output, line.trim_end_matches(['\n', '\r']));
                    reporter.report(Value::String(output.clone()));
                }
                Err(e) => {
                    return Err(ExecutorError::failed(format!("Failed to read output: {e}")));
                }
            }
        }

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };
        let Some(status) = waited else {
            return Err(stop(&mut child).await);
        };
        let status =
            status.map_err(|e| ExecutorError::failed(format!("Command execution failed: {e}")))?;

        let stderr = stderr_task.await.unwrap_or_default();
        let output = if stderr.is_empty() {
            output
        } else if output.is_empty() {
            stderr
        } else {
            format!("{output}\n--- stderr ---\n{stderr}")
        };

        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 {
            return Err(ExecutorError::failed(format!(
                "Command exited with code {exit_code}: {}",
                truncate_for_error(output.trim())
            )));
        }
        Ok(json!({ "output": output, "exit_code": exit_code }))
    }
}

async fn stop(child: &mut Child) -> ExecutorError {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to kill cancelled command");
    }
    ExecutorError::Cancelled
}

async fn read_capped<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut buf = Vec::new();
    if reader
        .take(MAX_OUTPUT_SIZE as u64)
        .read_to_end(&mut buf)
        .await
        .is_err()
    {
        buf.clear();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Append a line, dropping the oldest output once the cap is reached.
fn append_line(output: &mut String, line: &str) {
    if !output.is_empty() {
        output.push('\n');
    }
    output.push_str(line);

    if output.len() > MAX_OUTPUT_SIZE {
        let mut cut = output.len() - MAX_OUTPUT_SIZE;
        while !output.is_char_boundary(cut) {
            cut += 1;
        }
        output.drain(..cut);
    }
}

fn is_blocked(command: &str) -> bool {
    let normalized = command.to_lowercase();
    BLOCKED_PATTERNS.iter().any(|p| normalized.contains(p))
}

fn truncate_for_error(s: &str) -> String {
    if s.chars().count() <= 100 {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(100).collect::<String>())
    }
}
