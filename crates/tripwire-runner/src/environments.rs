//! Per-job execution environment.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tripwire_core::{Error, Result};

/// Trait for execution environments.
#[async_trait::async_trait]
pub trait Environment: Send + Sync {
    /// Prepare the execution environment.
    async fn prepare(&self) -> Result<()>;

    /// Get the working directory.
    fn working_dir(&self) -> &Path;

    /// Register a command to run during cleanup.
    async fn register_teardown(&self, command: String);

    /// Cleanup the execution environment.
    async fn cleanup(&self) -> Result<()>;
}

/// Host environment: a private workspace directory on the local machine.
pub struct HostEnvironment {
    workspace: PathBuf,
    keep: bool,
    teardown: Mutex<Vec<String>>,
}

impl HostEnvironment {
    pub fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            keep: false,
            teardown: Mutex::new(Vec::new()),
        }
    }

    /// Leave the workspace on disk after cleanup.
    pub fn keep_workspace(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }
}

#[async_trait::async_trait]
impl Environment for HostEnvironment {
    async fn prepare(&self) -> Result<()> {
        info!(workspace = %self.workspace.display(), "Preparing host environment");
        if tokio::fs::try_exists(&self.workspace).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&self.workspace)
                .await
                .map_err(|e| Error::Internal(format!("Failed to clear workspace: {}", e)))?;
        }
        tokio::fs::create_dir_all(&self.workspace)
            .await
            .map_err(|e| Error::Internal(format!("Failed to create workspace: {}", e)))?;
        Ok(())
    }

    fn working_dir(&self) -> &Path {
        &self.workspace
    }

    async fn register_teardown(&self, command: String) {
        self.teardown.lock().await.push(command);
    }

    async fn cleanup(&self) -> Result<()> {
        info!(workspace = %self.workspace.display(), "Cleaning up host environment");

        let commands = std::mem::take(&mut *self.teardown.lock().await);
        for command in commands.into_iter().rev() {
            let status = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .current_dir(&self.workspace)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await;
            match status {
                Ok(s) if s.success() => {}
                Ok(s) => warn!(command = %command, code = ?s.code(), "Teardown command failed"),
                Err(e) => warn!(command = %command, error = %e, "Teardown command could not run"),
            }
        }

        if !self.keep && tokio::fs::try_exists(&self.workspace).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&self.workspace)
                .await
                .map_err(|e| Error::Internal(format!("Failed to remove workspace: {}", e)))?;
        }
        Ok(())
    }
}
