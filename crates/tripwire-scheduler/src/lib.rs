//! Trigger evaluation and matrix planning for Tripwire.

pub mod glob;
pub mod matrix;
pub mod planner;
pub mod triggers;

pub use glob::{GlobFilter, PathPattern};
pub use matrix::{MatrixExpander, MatrixExpansion, MatrixJob};
pub use planner::{PlanOutcome, Planner, RunPlan};
pub use triggers::{TriggerDecision, TriggerEvent, TriggerMatcher};
