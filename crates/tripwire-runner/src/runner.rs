//! Core runner trait and types.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tripwire_core::Result;

/// Output line from step execution.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Result of step execution.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
}

/// Fully resolved command ready to execute.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub step_name: String,
    pub command: String,
    pub shell: String,
    pub working_dir: PathBuf,
    /// Variables added on top of the inherited process environment.
    pub env: HashMap<String, String>,
}

/// Trait for step execution.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute a step, streaming output to the provided channel.
    ///
    /// A non-zero exit is `Ok` with `success == false`; `Err` means the
    /// command could not be run at all.
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepResult>;
}
