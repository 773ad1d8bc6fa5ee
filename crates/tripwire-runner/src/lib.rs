//! Step execution engine for Tripwire.

pub mod actions;
pub mod environments;
pub mod job;
pub mod runner;
pub mod shell;

pub use actions::{ActionConfig, ActionInvocation, ActionRegistry, BuiltinAction, ResolvedAction};
pub use environments::{Environment, HostEnvironment};
pub use job::{JobEvent, JobExecutor, JobExecutorConfig};
pub use runner::{OutputLine, OutputStream, StepContext, StepResult, StepRunner};
pub use shell::ShellRunner;
