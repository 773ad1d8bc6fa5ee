//! Command handlers.

use crate::commands::EventArgs;
use crate::config::{CliConfig, OutputFormat};
use crate::event::{build_event, repository_root};
use crate::executor::execute_plan;
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tripwire_core::pipeline::PipelineDefinition;
use tripwire_core::run::{JobStatus, RunReport};
use tripwire_runner::{ActionRegistry, JobExecutor, JobExecutorConfig, ShellRunner};
use tripwire_scheduler::{PlanOutcome, Planner};
use tripwire_secrets::{EnvProvider, FileProvider, SecretManager, SecretManagerConfig};

type HandlerResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

const TEMPLATE: &str = include_str!("../../../pipelines/ci.yaml");

/// Find pipeline file in standard locations.
pub fn find_pipeline_file(path: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = path {
        return Some(PathBuf::from(p));
    }

    let candidates = [
        "tripwire.yaml",
        "tripwire.yml",
        ".tripwire.yaml",
        ".tripwire.yml",
        ".tripwire/pipeline.yaml",
        ".tripwire/pipeline.yml",
    ];

    candidates
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// Load, validate and statically check a pipeline file.
pub fn load_pipeline(path: &Path) -> HandlerResult<PipelineDefinition> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let definition = PipelineDefinition::from_yaml(&content)?;

    let registry = ActionRegistry::default();
    for step in &definition.steps {
        registry.check(step)?;
    }
    Ok(definition)
}

fn resolve_pipeline(path: Option<&str>) -> HandlerResult<(PathBuf, PipelineDefinition)> {
    let path = find_pipeline_file(path).ok_or(
        "No pipeline file found (looked for tripwire.yaml, .tripwire.yaml, .tripwire/pipeline.yaml)",
    )?;
    let definition = load_pipeline(&path)?;
    Ok((path, definition))
}

/// Write a starter pipeline.
pub async fn init(force: bool) -> HandlerResult {
    let path = Path::new("tripwire.yaml");

    if path.exists() && !force {
        println!("{} tripwire.yaml already exists", style("!").yellow());
        return Ok(());
    }

    tokio::fs::write(path, TEMPLATE).await?;
    println!("{} Created tripwire.yaml", style("✓").green());
    Ok(())
}

/// Validate a pipeline configuration.
pub async fn validate(path: Option<&str>) -> HandlerResult {
    let (path, definition) = resolve_pipeline(path)?;
    let planner = Planner::new(definition)?;
    let definition = planner.pipeline();

    println!(
        "{} Pipeline \"{}\" is valid ({})",
        style("✓").green(),
        definition.name,
        path.display()
    );

    println!("  Triggers: {}", definition.triggers.len());
    for trigger in &definition.triggers {
        let mut filters = Vec::new();
        if !trigger.branches.is_empty() {
            filters.push(format!("branches {}", trigger.branches.join(", ")));
        }
        if !trigger.paths.is_empty() {
            filters.push(format!("paths {}", trigger.paths.join(", ")));
        }
        if !trigger.paths_ignore.is_empty() {
            filters.push(format!("ignoring {}", trigger.paths_ignore.join(", ")));
        }
        if filters.is_empty() {
            println!("    - {}", trigger.trigger_type);
        } else {
            println!("    - {} ({})", trigger.trigger_type, filters.join("; "));
        }
    }

    let expansion = tripwire_scheduler::MatrixExpander::new().expand(definition);
    println!(
        "  Jobs: {} (fail_fast: {})",
        expansion.jobs.len(),
        expansion.fail_fast
    );
    println!("  Steps: {}", definition.steps.len());
    for step in &definition.steps {
        match &step.uses {
            Some(uses) => println!("    - {} [{}]", step.name, uses),
            None => println!("    - {}", step.name),
        }
    }

    Ok(())
}

/// Evaluate triggers and print the resulting jobs.
pub async fn plan(
    config: &CliConfig,
    pipeline: Option<&str>,
    event: &EventArgs,
    format: Option<OutputFormat>,
) -> HandlerResult {
    let (_, definition) = resolve_pipeline(pipeline)?;
    let cwd = std::env::current_dir()?;
    let event = build_event(event, &repository_root(&cwd).await).await?;
    let outcome = Planner::new(definition)?.plan(&event);

    if format.unwrap_or(config.output_format) == OutputFormat::Json {
        let jobs: Vec<serde_json::Value> = match &outcome {
            PlanOutcome::Run(plan) => plan
                .jobs
                .iter()
                .map(|j| {
                    serde_json::json!({
                        "index": j.index,
                        "name": j.display_name,
                        "matrix": j.values(),
                    })
                })
                .collect(),
            PlanOutcome::Skipped(_) => Vec::new(),
        };
        let decision = outcome.decision();
        let output = serde_json::json!({
            "event": event,
            "triggered": decision.triggered,
            "trigger": decision.trigger,
            "reason": decision.reason,
            "jobs": jobs,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match outcome {
        PlanOutcome::Skipped(decision) => {
            println!(
                "{} Not triggered: {}",
                style("⊘").yellow(),
                decision.reason
            );
        }
        PlanOutcome::Run(plan) => {
            println!(
                "{} Triggered by {}: {}",
                style("▶").cyan(),
                plan.trigger,
                plan.decision.reason
            );
            println!(
                "  {} jobs (fail_fast: {}, max_parallel: {})",
                plan.jobs.len(),
                plan.fail_fast,
                plan.max_parallel
                    .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
            );
            for job in &plan.jobs {
                println!("    {}. {}", job.index + 1, job.display_name);
            }
        }
    }
    Ok(())
}

async fn secret_manager(config: &CliConfig) -> HandlerResult<SecretManager> {
    let mut manager = SecretManager::new(SecretManagerConfig {
        strict: config.strict_secrets,
    });
    if let Some(path) = &config.secrets_file {
        manager.register_provider(Arc::new(FileProvider::load_from_file(path).await?));
    }
    manager.register_provider(Arc::new(EnvProvider::default()));
    Ok(manager)
}

pub struct RunOptions<'a> {
    pub pipeline: Option<&'a str>,
    pub event: &'a EventArgs,
    pub jobs: Option<usize>,
    pub keep_workspaces: bool,
    pub format: Option<OutputFormat>,
}

/// Plan and execute a run. Returns whether every job succeeded.
pub async fn run(config: &CliConfig, options: RunOptions<'_>) -> HandlerResult<bool> {
    let (_, definition) = resolve_pipeline(options.pipeline)?;
    let cwd = std::env::current_dir()?;
    let repository = repository_root(&cwd).await;
    let event = build_event(options.event, &repository).await?;
    let format = options.format.unwrap_or(config.output_format);

    let planner = Planner::new(definition)?;
    let plan = match planner.plan(&event) {
        PlanOutcome::Skipped(decision) => {
            if format == OutputFormat::Json {
                let output = serde_json::json!({
                    "triggered": false,
                    "reason": decision.reason,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!(
                    "{} Not triggered: {}",
                    style("⊘").yellow(),
                    decision.reason
                );
            }
            return Ok(true);
        }
        PlanOutcome::Run(plan) => plan,
    };

    if format == OutputFormat::Table {
        println!(
            "\n{} Running pipeline: {} ({} jobs, triggered by {})\n",
            style("▶").cyan().bold(),
            style(&plan.pipeline_name).bold(),
            plan.jobs.len(),
            plan.trigger
        );
    }

    let executor = JobExecutor::new(
        JobExecutorConfig {
            work_root: config.work_dir.clone(),
            repository,
            keep_workspaces: options.keep_workspaces || config.keep_workspaces,
            actions: config.action_config(),
        },
        Arc::new(ShellRunner::new()),
        Arc::new(secret_manager(config).await?),
    );

    let max_parallel = options
        .jobs
        .or(plan.max_parallel.map(|n| n as usize))
        .or(config.max_parallel);

    let report = execute_plan(
        Arc::new(planner.pipeline().clone()),
        &plan,
        Arc::new(executor),
        max_parallel,
        format == OutputFormat::Table,
    )
    .await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_summary(&report),
    }

    Ok(report.success())
}

fn print_summary(report: &RunReport) {
    println!();
    for job in &report.jobs {
        let (mark, status) = match job.status {
            JobStatus::Success => (style("✓").green(), style("success").green()),
            JobStatus::Cancelled => (style("⊘").yellow(), style("cancelled").yellow()),
            _ => (style("✗").red(), style("failure").red()),
        };
        print!(
            "  {} {:<40} {:<10} {:>8.2}s",
            mark,
            job.name,
            status,
            job.duration_ms as f64 / 1000.0
        );
        match job.failed_step() {
            Some(step) => println!("  failed at \"{}\"", step.name),
            None => println!(),
        }
    }

    println!();
    let seconds = report.duration_ms as f64 / 1000.0;
    if report.success() {
        println!(
            "{} Pipeline completed successfully in {:.2}s",
            style("✓").green().bold(),
            seconds
        );
    } else {
        println!(
            "{} Pipeline failed after {:.2}s ({} of {} jobs failed, {} cancelled)",
            style("✗").red().bold(),
            seconds,
            report.count(JobStatus::Failure),
            report.jobs.len(),
            report.count(JobStatus::Cancelled)
        );
    }
}

/// Print the pipeline JSON schema.
pub fn schema() -> HandlerResult {
    let schema = schemars::schema_for!(PipelineDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> HandlerResult {
    println!("{}", serde_yaml::to_string(config)?);
    println!(
        "{} {}",
        style("Config file:").dim(),
        CliConfig::config_path()?.display()
    );
    Ok(())
}

/// Set configuration value.
pub fn set_config(key: &str, value: &str) -> HandlerResult {
    let mut config = CliConfig::load_file()?;
    config.set(key, value)?;
    config.save()?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}
