//! Sandbox Executor - Out-of-process execution of model-generated code
//!
//! Each invocation spawns a fresh interpreter process with no shared state
//! beyond the persisted table files the code chooses to load. Stdout is the
//! only result channel; the generated code is required by contract to end
//! with a print of its answer. Failures (nonzero exit, timeout, spawn error)
//! are returned as data so the orchestrator can hand them back to the model
//! as a tool result instead of aborting the conversation.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

/// Outcome of one sandbox run. Never an `Err`: the conversation must be able
/// to continue on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Captured stdout on success, diagnostic text on failure.
    pub output: String,
}

impl ExecutionOutcome {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            output: stdout.into(),
        }
    }

    pub fn failure(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            output: diagnostic.into(),
        }
    }
}

#[derive(Clone)]
pub struct SandboxExecutor {
    python_bin: String,
    time_limit: Duration,
}

impl SandboxExecutor {
    pub fn new(python_bin: impl Into<String>, time_limit: Duration) -> Self {
        Self {
            python_bin: python_bin.into(),
            time_limit,
        }
    }

    /// Run one piece of generated code. Exactly one attempt: the model is
    /// expected to retry with a corrected tool call on the next iteration.
    pub async fn execute(&self, code: &str) -> ExecutionOutcome {
        let mut command = Command::new(&self.python_bin);
        command
            .arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Sandbox spawn failed: {}", e);
                return ExecutionOutcome::failure(format!(
                    "Failed to start the analysis interpreter: {}",
                    e
                ));
            }
        };

        match timeout(self.time_limit, child.wait_with_output()).await {
            Err(_) => ExecutionOutcome::failure(format!(
                "Execution timed out after {} seconds",
                self.time_limit.as_secs()
            )),
            Ok(Err(e)) => {
                ExecutionOutcome::failure(format!("An unexpected error occurred: {}", e))
            }
            Ok(Ok(output)) => {
                if output.status.success() {
                    ExecutionOutcome::success(String::from_utf8_lossy(&output.stdout).into_owned())
                } else {
                    let mut diagnostic =
                        String::from_utf8_lossy(&output.stderr).trim_end().to_string();
                    if diagnostic.is_empty() {
                        diagnostic = format!("Process exited with status {}", output.status);
                    }
                    ExecutionOutcome::failure(diagnostic)
                }
            }
        }
    }
}
