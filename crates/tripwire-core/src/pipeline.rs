//! Pipeline definition types.
//!
//! These types represent the user-authored pipeline YAML configuration.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDefinition {
    #[serde(default = "default_version")]
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Display name template for each matrix job, e.g.
    /// `Check Python ${{ matrix.python-version }} on ${{ matrix.os }}`.
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub variables: IndexMap<String, String>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    pub steps: Vec<StepDefinition>,
}

fn default_version() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub branches: Vec<String>,
    /// Inclusion globs; entries starting with `!` exclude.
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub paths_ignore: Vec<String>,
}

impl TriggerConfig {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            branches: vec![],
            paths: vec![],
            paths_ignore: vec![],
        }
    }

    pub fn with_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.branches = branches.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    fn has_filters(&self) -> bool {
        !self.branches.is_empty() || !self.paths.is_empty() || !self.paths_ignore.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Push,
    PullRequest,
    Manual,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerType::Push => "push",
            TriggerType::PullRequest => "pull_request",
            TriggerType::Manual => "manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatrixConfig {
    pub dimensions: IndexMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub include: Vec<IndexMap<String, serde_json::Value>>,
    #[serde(default)]
    pub exclude: Vec<IndexMap<String, serde_json::Value>>,
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    #[serde(default)]
    pub max_parallel: Option<u32>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    pub name: String,
    /// Built-in action to invoke instead of a shell command.
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub with: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

fn default_shell() -> String {
    "bash".to_string()
}

impl StepDefinition {
    /// A shell step running `command`.
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uses: None,
            with: IndexMap::new(),
            run: Some(command.into()),
            shell: default_shell(),
            working_directory: None,
            env: IndexMap::new(),
        }
    }

    /// A step invoking a built-in action.
    pub fn uses(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uses: Some(action.into()),
            with: IndexMap::new(),
            run: None,
            shell: default_shell(),
            working_directory: None,
            env: IndexMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.with.insert(key.into(), value);
        self
    }
}

impl PipelineDefinition {
    /// Parse and validate a pipeline from YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let definition: PipelineDefinition = serde_yaml::from_str(content)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Check structural rules serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::PipelineValidation("pipeline name is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(Error::PipelineValidation(format!(
                "pipeline '{}' has no steps",
                self.name
            )));
        }

        for (idx, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(Error::PipelineValidation(format!(
                    "step #{} has an empty name",
                    idx + 1
                )));
            }
            match (&step.run, &step.uses) {
                (Some(_), Some(_)) => {
                    return Err(Error::PipelineValidation(format!(
                        "step '{}' sets both 'run' and 'uses'",
                        step.name
                    )));
                }
                (None, None) => {
                    return Err(Error::PipelineValidation(format!(
                        "step '{}' needs either 'run' or 'uses'",
                        step.name
                    )));
                }
                _ => {}
            }
        }

        for trigger in &self.triggers {
            if trigger.trigger_type == TriggerType::Manual && trigger.has_filters() {
                return Err(Error::PipelineValidation(
                    "manual triggers do not accept branch or path filters".into(),
                ));
            }
        }

        if let Some(matrix) = &self.matrix {
            matrix.validate()?;
        }

        Ok(())
    }

    pub fn has_trigger(&self, trigger_type: TriggerType) -> bool {
        self.triggers.iter().any(|t| t.trigger_type == trigger_type)
    }
}

impl MatrixConfig {
    fn validate(&self) -> Result<()> {
        for (axis, values) in &self.dimensions {
            if values.is_empty() {
                return Err(Error::PipelineValidation(format!(
                    "matrix axis '{}' has no values",
                    axis
                )));
            }
            if let Some(bad) = values.iter().find(|v| !is_scalar(v)) {
                return Err(Error::PipelineValidation(format!(
                    "matrix axis '{}' has non-scalar value {}",
                    axis, bad
                )));
            }
        }
        for exclude in &self.exclude {
            if let Some(key) = exclude.keys().find(|k| !self.dimensions.contains_key(*k)) {
                return Err(Error::PipelineValidation(format!(
                    "matrix exclude references unknown axis '{}'",
                    key
                )));
            }
        }
        if self.max_parallel == Some(0) {
            return Err(Error::PipelineValidation(
                "matrix max_parallel must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn is_scalar(value: &serde_json::Value) -> bool {
    matches!(
        value,
        serde_json::Value::String(_) | serde_json::Value::Number(_) | serde_json::Value::Bool(_)
    )
}

/// Render a matrix or input value the way it appears in a command line.
pub fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"
name: ci
steps:
  - name: test
    run: echo ok
"#;

    #[test]
    fn test_defaults_applied() {
        let def = PipelineDefinition::from_yaml(MINIMAL).unwrap();
        assert_eq!(def.version, "1");
        assert_eq!(def.steps[0].shell, "bash");
        assert!(def.triggers.is_empty());
        assert!(def.matrix.is_none());
    }

    #[test]
    fn test_matrix_fail_fast_defaults_to_true() {
        let yaml = r#"
name: ci
matrix:
  dimensions:
    python-version: ["3.7", "3.8"]
steps:
  - name: test
    run: echo ok
"#;
        let def = PipelineDefinition::from_yaml(yaml).unwrap();
        let matrix = def.matrix.unwrap();
        assert!(matrix.fail_fast);
        assert_eq!(matrix.max_parallel, None);
        assert_eq!(matrix.dimensions["python-version"].len(), 2);
    }

    #[test]
    fn test_step_with_run_and_uses_rejected() {
        let yaml = r#"
name: ci
steps:
  - name: both
    run: echo ok
    uses: checkout
"#;
        let err = PipelineDefinition::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::PipelineValidation(_)));
    }

    #[test]
    fn test_step_without_action_rejected() {
        let yaml = r#"
name: ci
steps:
  - name: nothing
"#;
        assert!(PipelineDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_manual_trigger_with_filters_rejected() {
        let yaml = r#"
name: ci
triggers:
  - type: manual
    branches: [main]
steps:
  - name: test
    run: echo ok
"#;
        assert!(PipelineDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_empty_matrix_axis_rejected() {
        let yaml = r#"
name: ci
matrix:
  dimensions:
    os: []
steps:
  - name: test
    run: echo ok
"#;
        assert!(PipelineDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_exclude_unknown_axis_rejected() {
        let yaml = r#"
name: ci
matrix:
  dimensions:
    os: [linux]
  exclude:
    - arch: arm64
steps:
  - name: test
    run: echo ok
"#;
        assert!(PipelineDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_scalar_to_string() {
        assert_eq!(scalar_to_string(&serde_json::json!("3.10")), "3.10");
        assert_eq!(scalar_to_string(&serde_json::json!(16)), "16");
        assert_eq!(scalar_to_string(&serde_json::json!(true)), "true");
        assert_eq!(
            scalar_to_string(&serde_json::json!(["mysql", "postgres"])),
            "mysql postgres"
        );
    }
}
