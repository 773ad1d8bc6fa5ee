//! CLI command definitions.

use crate::config::OutputFormat;
use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter pipeline to tripwire.yaml
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate pipeline configuration
    Validate {
        /// Path to pipeline file
        path: Option<String>,
    },

    /// Evaluate triggers and print the job matrix without running it
    Plan {
        /// Path to pipeline file
        #[arg(short, long)]
        pipeline: Option<String>,

        #[command(flatten)]
        event: EventArgs,

        /// Output format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Plan and execute the pipeline locally
    Run {
        /// Path to pipeline file
        #[arg(short, long)]
        pipeline: Option<String>,

        #[command(flatten)]
        event: EventArgs,

        /// Maximum number of jobs running at once
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Keep job workspaces after the run
        #[arg(long)]
        keep_workspaces: bool,

        /// Output format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Print the pipeline JSON schema
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Configuration value
        value: String,
    },
}

/// Kind of event to simulate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum EventKind {
    #[default]
    Push,
    #[value(name = "pull_request")]
    PullRequest,
    Manual,
}

/// Flags describing the triggering event.
#[derive(Debug, Clone, Default, Args)]
pub struct EventArgs {
    /// Event type
    #[arg(long = "event", value_enum, default_value_t = EventKind::Push)]
    pub kind: EventKind,

    /// Pushed branch, or source branch of a pull request
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Branch a pull request targets
    #[arg(long)]
    pub target_branch: Option<String>,

    /// Changed path (repeatable, or comma separated)
    #[arg(long = "changed", value_delimiter = ',')]
    pub changed: Vec<String>,

    /// Revision to check out
    #[arg(long)]
    pub sha: Option<String>,

    /// User dispatching a manual run
    #[arg(long)]
    pub actor: Option<String>,

    /// Read the event from a JSON file instead of flags
    #[arg(long, conflicts_with_all = ["branch", "target_branch", "changed", "sha", "actor", "since"])]
    pub event_file: Option<PathBuf>,

    /// Add the paths from `git diff --name-only <since>` to the changed set
    #[arg(long)]
    pub since: Option<String>,
}
