//! Executor that runs each job as a shell command.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use gantry_core::Job;
use gantry_scheduler::{ExecutionOutcome, Executor};

/// Argument key holding the shell command a job runs.
pub(crate) const CMD_KEY: &str = "cmd";

/// Runs a job's `cmd` argument under the platform shell.
pub(crate) struct ProcessExecutor;

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, job: &Job, cancel: CancellationToken) -> ExecutionOutcome {
        let Some(command) = job.arguments.get_str(CMD_KEY) else {
            return ExecutionOutcome::Failed(format!("job has no '{CMD_KEY}' argument"));
        };

        let (shell, flag) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut cmd = Command::new(shell);
        cmd.arg(flag)
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            result = cmd.output() => match result {
                Ok(output) => output,
                Err(e) => return ExecutionOutcome::Failed(format!("failed to spawn: {e}")),
            },
            // Dropping the in-flight future kills the child.
            _ = cancel.cancelled() => {
                debug!("job {} interrupted", job.id);
                return ExecutionOutcome::Failed("interrupted".to_string());
            }
        };

        if output.status.success() {
            ExecutionOutcome::Succeeded
        } else {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            ExecutionOutcome::Failed(format!(
                "exit code {code}: {}",
                stderr.lines().next().unwrap_or("")
            ))
        }
    }
}
