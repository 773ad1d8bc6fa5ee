//! Sequential, fail-fast execution of one matrix job.

use crate::actions::{ActionConfig, ActionInvocation, ActionRegistry, compose_project_name};
use crate::environments::{Environment, HostEnvironment};
use crate::runner::{OutputLine, StepContext, StepRunner};
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{Instrument, error, info, info_span, warn};
use tripwire_core::interpolation::{InterpolationContext, referenced_secrets};
use tripwire_core::pipeline::{PipelineDefinition, StepDefinition};
use tripwire_core::run::{JobReport, JobStatus, StepReport, StepStatus};
use tripwire_core::{Result, RunId};
use tripwire_scheduler::{MatrixJob, TriggerEvent};
use tripwire_secrets::SecretManager;

/// Progress notifications emitted while a job runs.
#[derive(Debug, Clone)]
pub enum JobEvent {
    JobStarted {
        job: usize,
        name: String,
    },
    StepStarted {
        job: usize,
        step: usize,
        total: usize,
        name: String,
    },
    /// A line of step output with secrets already masked.
    Output {
        job: usize,
        line: OutputLine,
    },
    StepFinished {
        job: usize,
        report: StepReport,
    },
    JobFinished {
        job: usize,
        status: JobStatus,
        duration_ms: u64,
    },
}

#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// Parent of all run workspaces; each job gets
    /// `<work_root>/<run>/job-<index>`.
    pub work_root: PathBuf,
    /// Repository cloned by the `checkout` action.
    pub repository: PathBuf,
    pub keep_workspaces: bool,
    pub actions: ActionConfig,
}

/// Runs the steps of a single job in its own workspace.
pub struct JobExecutor {
    config: JobExecutorConfig,
    runner: Arc<dyn StepRunner>,
    secrets: Arc<SecretManager>,
    actions: ActionRegistry,
}

impl JobExecutor {
    pub fn new(
        config: JobExecutorConfig,
        runner: Arc<dyn StepRunner>,
        secrets: Arc<SecretManager>,
    ) -> Self {
        let actions = ActionRegistry::new(config.actions.clone());
        Self {
            config,
            runner,
            secrets,
            actions,
        }
    }

    pub fn workspace_for(&self, run_id: &RunId, job: &MatrixJob) -> PathBuf {
        self.config
            .work_root
            .join(run_id.short())
            .join(format!("job-{}", job.index))
    }

    /// Run every step of `job` in order, stopping at the first failure.
    ///
    /// Setting `cancel` to `true` interrupts the running step and marks the
    /// job cancelled. Teardown always runs before this returns.
    pub async fn execute(
        &self,
        pipeline: &PipelineDefinition,
        run_id: &RunId,
        event: &TriggerEvent,
        job: &MatrixJob,
        events: mpsc::Sender<JobEvent>,
        cancel: watch::Receiver<bool>,
    ) -> JobReport {
        let span = info_span!("job", index = job.index, name = %job.display_name);
        self.execute_inner(pipeline, run_id, event, job, events, cancel)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        pipeline: &PipelineDefinition,
        run_id: &RunId,
        event: &TriggerEvent,
        job: &MatrixJob,
        events: mpsc::Sender<JobEvent>,
        mut cancel: watch::Receiver<bool>,
    ) -> JobReport {
        let started_at = Utc::now();
        let start = std::time::Instant::now();
        let _ = events
            .send(JobEvent::JobStarted {
                job: job.index,
                name: job.display_name.clone(),
            })
            .await;
        info!("Job started");

        let env = HostEnvironment::new(self.workspace_for(run_id, job))
            .keep_workspace(self.config.keep_workspaces);
        let project = compose_project_name(&run_id.short(), job.index);

        let mut steps = Vec::with_capacity(pipeline.steps.len());
        let mut status = JobStatus::Success;

        match self.prepare(pipeline, event, job, &env).await {
            Ok(ctx) => {
                let ctx = Arc::new(ctx);
                let base_env = self.base_env(pipeline, run_id, event, job, &env, &project, &ctx);
                let total = pipeline.steps.len();

                for (i, step) in pipeline.steps.iter().enumerate() {
                    if status != JobStatus::Success {
                        steps.push(StepReport::skipped(ctx.interpolate(&step.name)));
                        continue;
                    }
                    if *cancel.borrow() {
                        status = JobStatus::Cancelled;
                        steps.push(StepReport::skipped(ctx.interpolate(&step.name)));
                        continue;
                    }

                    let name = ctx.interpolate(&step.name);
                    let _ = events
                        .send(JobEvent::StepStarted {
                            job: job.index,
                            step: i,
                            total,
                            name: name.clone(),
                        })
                        .await;

                    let step_start = std::time::Instant::now();
                    let outcome = tokio::select! {
                        outcome = self.run_step(step, &name, &ctx, &base_env, event, &env, &project, job.index, &events) => Some(outcome),
                        _ = cancelled(&mut cancel) => None,
                    };

                    let report = match outcome {
                        Some(Ok(exit_code)) => StepReport {
                            name,
                            status: if exit_code == 0 {
                                StepStatus::Success
                            } else {
                                StepStatus::Failure
                            },
                            exit_code: Some(exit_code),
                            duration_ms: step_start.elapsed().as_millis() as u64,
                        },
                        Some(Err(e)) => {
                            error!(step = %name, error = %e, "Step could not be executed");
                            StepReport {
                                name,
                                status: StepStatus::Failure,
                                exit_code: Some(-1),
                                duration_ms: step_start.elapsed().as_millis() as u64,
                            }
                        }
                        None => {
                            warn!(step = %name, "Step interrupted by cancellation");
                            status = JobStatus::Cancelled;
                            StepReport::skipped(name)
                        }
                    };

                    if report.status == StepStatus::Failure {
                        warn!(step = %report.name, exit_code = ?report.exit_code, "Step failed");
                        status = JobStatus::Failure;
                    }

                    let _ = events
                        .send(JobEvent::StepFinished {
                            job: job.index,
                            report: report.clone(),
                        })
                        .await;
                    steps.push(report);
                }
            }
            Err(e) => {
                error!(error = %e, "Job setup failed");
                status = JobStatus::Failure;
                steps.extend(pipeline.steps.iter().map(|s| StepReport::skipped(&s.name)));
            }
        }

        if let Err(e) = env.cleanup().await {
            warn!(error = %e, "Workspace cleanup failed");
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(status = %status, duration_ms, "Job finished");
        let _ = events
            .send(JobEvent::JobFinished {
                job: job.index,
                status,
                duration_ms,
            })
            .await;

        JobReport {
            id: job.id,
            name: job.display_name.clone(),
            index: job.index,
            matrix: job.values(),
            status,
            steps,
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            duration_ms,
        }
    }

    /// Create the workspace and build the interpolation context, resolving
    /// every secret the pipeline's steps and variables reference.
    async fn prepare(
        &self,
        pipeline: &PipelineDefinition,
        event: &TriggerEvent,
        job: &MatrixJob,
        env: &HostEnvironment,
    ) -> Result<InterpolationContext> {
        env.prepare().await?;

        let mut ctx = InterpolationContext::new();
        ctx.variables = pipeline
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ctx.matrix = job.values().into_iter().collect();
        ctx.event = event_fields(event);

        let mut names: BTreeSet<String> =
            pipeline.steps.iter().flat_map(step_secret_refs).collect();
        for value in pipeline.variables.values() {
            names.extend(referenced_secrets(value));
        }
        ctx.secrets = self
            .secrets
            .resolve_all(names.iter().map(String::as_str))
            .await?;

        // Variables may themselves reference matrix values or secrets.
        let variables: HashMap<String, String> = ctx
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), ctx.interpolate(v)))
            .collect();
        ctx.variables = variables;
        Ok(ctx)
    }

    #[allow(clippy::too_many_arguments)]
    fn base_env(
        &self,
        pipeline: &PipelineDefinition,
        run_id: &RunId,
        event: &TriggerEvent,
        job: &MatrixJob,
        env: &HostEnvironment,
        project: &str,
        ctx: &InterpolationContext,
    ) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("CI".to_string(), "true".to_string());
        vars.insert("TRIPWIRE".to_string(), "true".to_string());
        vars.insert("TRIPWIRE_PIPELINE".to_string(), pipeline.name.clone());
        vars.insert("TRIPWIRE_RUN_ID".to_string(), run_id.to_string());
        vars.insert("TRIPWIRE_JOB_INDEX".to_string(), job.index.to_string());
        vars.insert("TRIPWIRE_JOB_NAME".to_string(), job.display_name.clone());
        vars.insert(
            "TRIPWIRE_WORKSPACE".to_string(),
            env.working_dir().display().to_string(),
        );
        vars.insert(
            "TRIPWIRE_EVENT".to_string(),
            event.trigger_type().to_string(),
        );
        if let Some(branch) = event.ref_name() {
            vars.insert("TRIPWIRE_BRANCH".to_string(), branch.to_string());
        }
        if let Some(sha) = event.sha() {
            vars.insert("TRIPWIRE_SHA".to_string(), sha.to_string());
        }
        vars.insert("COMPOSE_PROJECT_NAME".to_string(), project.to_string());

        // Secret-bearing variables only reach steps that interpolate them.
        for (key, raw) in &pipeline.variables {
            if !referenced_secrets(raw).is_empty() {
                continue;
            }
            if let Some(value) = ctx.variables.get(key) {
                vars.insert(key.clone(), value.clone());
            }
        }
        vars
    }

    /// Run one step to completion, returning its exit code.
    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        step: &StepDefinition,
        name: &str,
        ctx: &Arc<InterpolationContext>,
        base_env: &HashMap<String, String>,
        event: &TriggerEvent,
        env: &HostEnvironment,
        project: &str,
        job_index: usize,
        events: &mpsc::Sender<JobEvent>,
    ) -> Result<i32> {
        let command = match (&step.run, &step.uses) {
            (Some(run), _) => ctx.interpolate(run),
            (None, Some(uses)) => {
                let inputs: IndexMap<String, Value> = step
                    .with
                    .iter()
                    .map(|(k, v)| (k.clone(), interpolate_value(ctx, v)))
                    .collect();
                let invocation = ActionInvocation {
                    inputs: &inputs,
                    repository: &self.config.repository,
                    sha: event.sha(),
                    project,
                };
                let resolved = self.actions.resolve(uses, &invocation)?;
                if let Some(teardown) = resolved.teardown {
                    env.register_teardown(teardown).await;
                }
                resolved.command
            }
            (None, None) => {
                return Err(tripwire_core::Error::PipelineValidation(format!(
                    "Step '{}' has neither 'run' nor 'uses'",
                    step.name
                )));
            }
        };

        let mut step_env = base_env.clone();
        for (key, value) in &step.env {
            step_env.insert(key.clone(), ctx.interpolate(value));
        }

        let working_dir = match &step.working_directory {
            Some(dir) => env.working_dir().join(ctx.interpolate(dir)),
            None => env.working_dir().to_path_buf(),
        };

        let step_ctx = StepContext {
            step_name: name.to_string(),
            command,
            shell: step.shell.clone(),
            working_dir,
            env: step_env,
        };

        let (tx, mut rx) = mpsc::channel::<OutputLine>(100);
        let forward = async {
            while let Some(mut line) = rx.recv().await {
                line.content = ctx.mask_secrets(&line.content);
                let _ = events
                    .send(JobEvent::Output {
                        job: job_index,
                        line,
                    })
                    .await;
            }
        };

        let (result, ()) = tokio::join!(self.runner.execute(&step_ctx, tx), forward);
        Ok(result?.exit_code)
    }
}

/// Resolves once `cancel` flips to `true`; never resolves if the sender is
/// gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn event_fields(event: &TriggerEvent) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("name".to_string(), event.trigger_type().to_string());
    if let Some(branch) = event.ref_name() {
        fields.insert("branch".to_string(), branch.to_string());
    }
    if let Some(sha) = event.sha() {
        fields.insert("sha".to_string(), sha.to_string());
    }
    if let TriggerEvent::Manual {
        actor: Some(actor), ..
    } = event
    {
        fields.insert("actor".to_string(), actor.clone());
    }
    fields
}

fn interpolate_value(ctx: &InterpolationContext, value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(ctx.interpolate(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate_value(ctx, v)).collect()),
        other => other.clone(),
    }
}

fn collect_value_secrets(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => out.extend(referenced_secrets(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_value_secrets(v, out)),
        _ => {}
    }
}

/// Secret names referenced anywhere in a step.
pub fn step_secret_refs(step: &StepDefinition) -> BTreeSet<String> {
    let mut names = referenced_secrets(&step.name);
    if let Some(run) = &step.run {
        names.extend(referenced_secrets(run));
    }
    for value in step.env.values() {
        names.extend(referenced_secrets(value));
    }
    for value in step.with.values() {
        collect_value_secrets(value, &mut names);
    }
    names
}
