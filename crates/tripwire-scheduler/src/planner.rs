//! Turn a triggering event into a concrete run plan.

use crate::matrix::{MatrixExpander, MatrixJob};
use crate::triggers::{TriggerDecision, TriggerEvent, TriggerMatcher};
use tracing::info;
use tripwire_core::Result;
use tripwire_core::ids::RunId;
use tripwire_core::pipeline::{PipelineDefinition, TriggerType};

/// Fixed job list produced for one triggering event.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub run_id: RunId,
    pub pipeline_name: String,
    pub trigger: TriggerType,
    pub event: TriggerEvent,
    pub decision: TriggerDecision,
    pub jobs: Vec<MatrixJob>,
    pub fail_fast: bool,
    pub max_parallel: Option<u32>,
}

#[derive(Debug, Clone)]
pub enum PlanOutcome {
    /// The event did not pass the pipeline's triggers.
    Skipped(TriggerDecision),
    Run(RunPlan),
}

impl PlanOutcome {
    pub fn decision(&self) -> &TriggerDecision {
        match self {
            PlanOutcome::Skipped(decision) => decision,
            PlanOutcome::Run(plan) => &plan.decision,
        }
    }

    pub fn into_plan(self) -> Option<RunPlan> {
        match self {
            PlanOutcome::Skipped(_) => None,
            PlanOutcome::Run(plan) => Some(plan),
        }
    }
}

/// Planner bound to a single pipeline definition.
pub struct Planner {
    pipeline: PipelineDefinition,
    matcher: TriggerMatcher,
    expander: MatrixExpander,
}

impl Planner {
    /// Compile the pipeline's triggers. Fails on invalid glob patterns.
    pub fn new(pipeline: PipelineDefinition) -> Result<Self> {
        let matcher = TriggerMatcher::new(&pipeline)?;
        Ok(Self {
            pipeline,
            matcher,
            expander: MatrixExpander::new(),
        })
    }

    pub fn pipeline(&self) -> &PipelineDefinition {
        &self.pipeline
    }

    pub fn plan(&self, event: &TriggerEvent) -> PlanOutcome {
        let decision = self.matcher.evaluate(event);
        if !decision.triggered {
            info!(pipeline = %self.pipeline.name, reason = %decision.reason, "Pipeline not triggered");
            return PlanOutcome::Skipped(decision);
        }

        let expansion = self.expander.expand(&self.pipeline);
        let plan = RunPlan {
            run_id: RunId::new(),
            pipeline_name: self.pipeline.name.clone(),
            trigger: decision.trigger,
            event: event.clone(),
            decision,
            jobs: expansion.jobs,
            fail_fast: expansion.fail_fast,
            max_parallel: expansion.max_parallel,
        };

        info!(
            pipeline = %plan.pipeline_name,
            run_id = %plan.run_id,
            jobs = plan.jobs.len(),
            "Pipeline triggered"
        );
        PlanOutcome::Run(plan)
    }
}
