//! Built-in `uses:` actions.
//!
//! Each action expands to a shell command run in the job workspace, plus an
//! optional teardown command run when the job's environment is cleaned up.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tripwire_core::pipeline::{StepDefinition, scalar_to_string};
use tripwire_core::{Error, Result};

/// Command templates used by the built-in actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Command provisioning an interpreter; `{version}` is replaced by the
    /// quoted `python-version` input.
    pub setup_python_command: String,
    /// Compose executable, e.g. `docker-compose` or `docker compose`.
    pub compose_command: String,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            setup_python_command:
                "pyenv install --skip-existing {version} && pyenv local {version} && python --version"
                    .to_string(),
            compose_command: "docker-compose".to_string(),
        }
    }
}

/// Actions understood by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAction {
    Checkout,
    SetupPython,
    ComposeUp,
}

impl BuiltinAction {
    /// Parse a `uses:` reference. `actions/checkout@v2` style references are
    /// accepted as aliases; the version suffix is ignored.
    pub fn parse(uses: &str) -> Result<Self> {
        let name = uses.split('@').next().unwrap_or(uses).trim();
        match name {
            "checkout" | "actions/checkout" => Ok(Self::Checkout),
            "setup-python" | "actions/setup-python" => Ok(Self::SetupPython),
            "compose-up" => Ok(Self::ComposeUp),
            _ => Err(Error::UnknownAction(uses.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Checkout => "checkout",
            Self::SetupPython => "setup-python",
            Self::ComposeUp => "compose-up",
        }
    }

    fn required_inputs(&self) -> &'static [&'static str] {
        match self {
            Self::Checkout => &[],
            Self::SetupPython => &["python-version"],
            Self::ComposeUp => &["services"],
        }
    }
}

/// Everything an action needs to know about the job it runs in.
#[derive(Debug, Clone)]
pub struct ActionInvocation<'a> {
    /// Interpolated `with:` inputs.
    pub inputs: &'a IndexMap<String, Value>,
    /// Repository checked out by `checkout` unless overridden by the
    /// `repository` input.
    pub repository: &'a Path,
    /// Revision of the triggering event, if known.
    pub sha: Option<&'a str>,
    /// Compose project name, unique per job.
    pub project: &'a str,
}

impl ActionInvocation<'_> {
    fn input(&self, action: BuiltinAction, key: &str) -> Result<String> {
        self.optional_input(key)
            .ok_or_else(|| Error::MissingActionInput {
                action: action.name().to_string(),
                input: key.to_string(),
            })
    }

    fn optional_input(&self, key: &str) -> Option<String> {
        self.inputs
            .get(key)
            .map(scalar_to_string)
            .filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAction {
    pub command: String,
    pub teardown: Option<String>,
}

/// Resolves `uses:` steps into shell commands.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    config: ActionConfig,
}

impl ActionRegistry {
    pub fn new(config: ActionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ActionConfig {
        &self.config
    }

    /// Static check of a step: the action exists and required inputs are
    /// present.
    pub fn check(&self, step: &StepDefinition) -> Result<()> {
        let Some(uses) = &step.uses else {
            return Ok(());
        };
        let action = BuiltinAction::parse(uses)?;
        for input in action.required_inputs() {
            if !step.with.contains_key(*input) {
                return Err(Error::MissingActionInput {
                    action: action.name().to_string(),
                    input: input.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn resolve(&self, uses: &str, invocation: &ActionInvocation<'_>) -> Result<ResolvedAction> {
        let action = BuiltinAction::parse(uses)?;
        match action {
            BuiltinAction::Checkout => {
                let repository = invocation
                    .optional_input("repository")
                    .unwrap_or_else(|| invocation.repository.display().to_string());
                let revision = invocation
                    .optional_input("ref")
                    .or_else(|| invocation.sha.map(str::to_string))
                    .unwrap_or_else(|| "HEAD".to_string());
                Ok(ResolvedAction {
                    command: format!(
                        "git clone --quiet --no-checkout {} . && git checkout --quiet --force {}",
                        shell_quote(&repository),
                        shell_quote(&revision)
                    ),
                    teardown: None,
                })
            }
            BuiltinAction::SetupPython => {
                let version = invocation.input(action, "python-version")?;
                Ok(ResolvedAction {
                    command: self
                        .config
                        .setup_python_command
                        .replace("{version}", &shell_quote(&version)),
                    teardown: None,
                })
            }
            BuiltinAction::ComposeUp => {
                let services = invocation
                    .inputs
                    .get("services")
                    .map(service_list)
                    .unwrap_or_default();
                if services.is_empty() {
                    return Err(Error::MissingActionInput {
                        action: action.name().to_string(),
                        input: "services".to_string(),
                    });
                }

                let mut base = format!(
                    "{} -p {}",
                    self.config.compose_command,
                    shell_quote(invocation.project)
                );
                if let Some(file) = invocation.optional_input("file") {
                    base.push_str(" -f ");
                    base.push_str(&shell_quote(&file));
                }

                let services: Vec<String> = services.iter().map(|s| shell_quote(s)).collect();
                Ok(ResolvedAction {
                    command: format!("{} up -d {}", base, services.join(" ")),
                    teardown: Some(format!("{} down --volumes", base)),
                })
            }
        }
    }
}

fn service_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .filter(|s| !s.is_empty())
            .collect(),
        other => scalar_to_string(other)
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    }
}

/// Compose project name for one job: lowercase, `[a-z0-9_-]` only.
pub fn compose_project_name(run_short: &str, job_index: usize) -> String {
    format!("tripwire-{}-{}", run_short, job_index)
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Single-quote `value` for POSIX shells.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@=+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
