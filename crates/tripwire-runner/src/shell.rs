//! Shell-based step execution on the host.

use crate::runner::{OutputLine, OutputStream, StepContext, StepResult, StepRunner};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tripwire_core::{Error, Result};

/// Shell runner for executing commands on the host.
///
/// There is no timeout and no retry: the step blocks until the command
/// exits.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    fn shell_args(shell: &str) -> &'static [&'static str] {
        // POSIX shells stop at the first failing line of a multi-line script.
        match shell.rsplit('/').next().unwrap_or(shell) {
            "bash" | "sh" | "zsh" | "dash" => &["-e", "-c"],
            _ => &["-c"],
        }
    }
}

fn stream_lines<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<OutputLine>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut line_num = 0u32;

        while let Ok(Some(line)) = lines.next_line().await {
            line_num += 1;
            let output = OutputLine {
                stream,
                content: line,
                line_number: line_num,
                timestamp: chrono::Utc::now(),
            };
            if tx.send(output).await.is_err() {
                break;
            }
        }
    })
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult> {
        let start = std::time::Instant::now();

        info!(
            step = %ctx.step_name,
            shell = %ctx.shell,
            workdir = %ctx.working_dir.display(),
            "Executing shell command"
        );
        debug!(command = %ctx.command, "Command line");

        let mut child = Command::new(&ctx.shell)
            .args(Self::shell_args(&ctx.shell))
            .arg(&ctx.command)
            .current_dir(&ctx.working_dir)
            .envs(&ctx.env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn {}: {}", ctx.shell, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr not captured".to_string()))?;

        let stdout_handle = stream_lines(stdout, OutputStream::Stdout, output_tx.clone());
        let stderr_handle = stream_lines(stderr, OutputStream::Stderr, output_tx);

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Internal(format!("Failed to wait for process: {}", e)))?;

        // Wait for output streaming to complete
        let _ = stdout_handle.await;
        let _ = stderr_handle.await;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(exit_code, duration_ms, "Command completed");

        Ok(StepResult {
            exit_code,
            success: status.success(),
            duration_ms,
        })
    }
}
