//! Tripwire CLI entrypoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod commands;
mod config;
mod event;
mod executor;
mod handlers;

#[cfg(test)]
mod executor_tests;
#[cfg(test)]
mod pipeline_tests;

use commands::{Commands, ConfigCommands};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "tripwire")]
#[command(author, version, about = "Run trigger-filtered matrix pipelines locally", long_about = None)]
struct Cli {
    /// Debug-level logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }

    let config = CliConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Could not load configuration, using defaults");
        CliConfig::default()
    });

    match cli.command {
        Commands::Init { force } => handlers::init(force).await?,
        Commands::Validate { path } => handlers::validate(path.as_deref()).await?,
        Commands::Plan {
            pipeline,
            event,
            format,
        } => handlers::plan(&config, pipeline.as_deref(), &event, format).await?,
        Commands::Run {
            pipeline,
            event,
            jobs,
            keep_workspaces,
            format,
        } => {
            let success = handlers::run(
                &config,
                handlers::RunOptions {
                    pipeline: pipeline.as_deref(),
                    event: &event,
                    jobs,
                    keep_workspaces,
                    format,
                },
            )
            .await?;
            if !success {
                std::process::exit(1);
            }
        }
        Commands::Schema => handlers::schema()?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(())
}
