//! Local execution of a run plan: one task per matrix job.

use console::style;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info};
use tripwire_core::interpolation::InterpolationContext;
use tripwire_core::pipeline::PipelineDefinition;
use tripwire_core::run::{JobReport, JobStatus, RunReport, StepReport};
use tripwire_runner::{JobEvent, JobExecutor, OutputStream};
use tripwire_scheduler::{MatrixJob, RunPlan};

/// Run all jobs of `plan`, at most `max_parallel` at a time.
///
/// Under `fail_fast` the first failing job cancels running siblings and
/// keeps queued ones from starting.
pub async fn execute_plan(
    pipeline: Arc<PipelineDefinition>,
    plan: &RunPlan,
    executor: Arc<JobExecutor>,
    max_parallel: Option<usize>,
    show_progress: bool,
) -> RunReport {
    let started_at = chrono::Utc::now();
    let start = std::time::Instant::now();

    let limit = max_parallel.unwrap_or(plan.jobs.len()).max(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancel_tx = Arc::new(cancel_tx);
    let (event_tx, event_rx) = mpsc::channel(1024);

    let names: HashMap<usize, String> = plan
        .jobs
        .iter()
        .map(|j| (j.index, j.display_name.clone()))
        .collect();
    let printer = tokio::spawn(print_progress(event_rx, names, show_progress));

    info!(
        run_id = %plan.run_id,
        jobs = plan.jobs.len(),
        limit,
        fail_fast = plan.fail_fast,
        "Executing run"
    );

    let mut join_set = JoinSet::new();
    for job in plan.jobs.clone() {
        let pipeline = pipeline.clone();
        let executor = executor.clone();
        let semaphore = semaphore.clone();
        let events = event_tx.clone();
        let cancel = cancel_rx.clone();
        let cancel_tx = cancel_tx.clone();
        let fail_fast = plan.fail_fast;
        let run_id = plan.run_id;
        let event = plan.event.clone();

        join_set.spawn(async move {
            let permit = semaphore.acquire_owned().await;
            if permit.is_err() || *cancel.borrow() {
                return cancelled_report(&pipeline, &job);
            }
            let report = executor
                .execute(&pipeline, &run_id, &event, &job, events, cancel)
                .await;
            // Signal before the permit is released so no queued job starts.
            if fail_fast && report.status == JobStatus::Failure && !cancel_tx.send_replace(true) {
                info!(job = %report.name, "Job failed, cancelling remaining jobs");
            }
            drop(permit);
            report
        });
    }
    drop(event_tx);

    let mut reports: Vec<Option<JobReport>> = vec![None; plan.jobs.len()];
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(report) => {
                let slot = report.index;
                if let Some(entry) = reports.get_mut(slot) {
                    *entry = Some(report);
                }
            }
            Err(e) => error!(error = %e, "Job task failed"),
        }
    }

    let _ = printer.await;

    let jobs = plan
        .jobs
        .iter()
        .zip(reports)
        .map(|(job, report)| {
            report.unwrap_or_else(|| {
                let mut report = cancelled_report(&pipeline, job);
                report.status = JobStatus::Failure;
                report
            })
        })
        .collect();

    RunReport {
        id: plan.run_id,
        pipeline_name: plan.pipeline_name.clone(),
        trigger: plan.trigger,
        jobs,
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Report for a job that never started.
fn cancelled_report(pipeline: &PipelineDefinition, job: &MatrixJob) -> JobReport {
    let mut ctx = InterpolationContext::new();
    ctx.matrix = job.values().into_iter().collect();

    JobReport {
        id: job.id,
        name: job.display_name.clone(),
        index: job.index,
        matrix: job.values(),
        status: JobStatus::Cancelled,
        steps: pipeline
            .steps
            .iter()
            .map(|s| StepReport::skipped(ctx.interpolate(&s.name)))
            .collect(),
        started_at: None,
        completed_at: None,
        duration_ms: 0,
    }
}

async fn print_progress(
    mut events: mpsc::Receiver<JobEvent>,
    names: HashMap<usize, String>,
    enabled: bool,
) {
    let label = |job: usize| names.get(&job).cloned().unwrap_or_else(|| format!("job {}", job));

    while let Some(event) = events.recv().await {
        if !enabled {
            continue;
        }
        match event {
            JobEvent::JobStarted { job, .. } => {
                println!("{} {}", style("▶").cyan().bold(), style(label(job)).bold());
            }
            JobEvent::StepStarted {
                job,
                step,
                total,
                name,
            } => {
                println!(
                    "  {} [{}] {} ({}/{})",
                    style("━━▶").cyan(),
                    style(label(job)).dim(),
                    style(&name).bold(),
                    step + 1,
                    total
                );
            }
            JobEvent::Output { job, line } => match line.stream {
                OutputStream::Stdout => {
                    println!("      [{}] {}", label(job), style(&line.content).dim())
                }
                OutputStream::Stderr => {
                    println!("      [{}] {}", label(job), style(&line.content).red().dim())
                }
            },
            JobEvent::StepFinished { job, report } => {
                if report.status == tripwire_core::run::StepStatus::Success {
                    println!(
                        "    {} [{}] {} ({:.2}s)",
                        style("✓").green(),
                        style(label(job)).dim(),
                        report.name,
                        report.duration_ms as f64 / 1000.0
                    );
                } else if report.status == tripwire_core::run::StepStatus::Failure {
                    println!(
                        "    {} [{}] {} (exit code {})",
                        style("✗").red(),
                        style(label(job)).dim(),
                        report.name,
                        report.exit_code.unwrap_or(-1)
                    );
                }
            }
            JobEvent::JobFinished {
                job,
                status,
                duration_ms,
            } => {
                let mark = match status {
                    JobStatus::Success => style("✓").green().bold(),
                    JobStatus::Cancelled => style("⊘").yellow().bold(),
                    _ => style("✗").red().bold(),
                };
                println!(
                    "{} {} {} in {:.2}s",
                    mark,
                    style(label(job)).bold(),
                    status,
                    duration_ms as f64 / 1000.0
                );
            }
        }
    }
}
