//! CLI configuration management.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tripwire_runner::ActionConfig;

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Root directory for job workspaces.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Keep job workspaces after a run.
    #[serde(default)]
    pub keep_workspaces: bool,
    /// JSON file of secret name/value pairs, consulted before the environment.
    #[serde(default)]
    pub secrets_file: Option<PathBuf>,
    /// Fail jobs whose referenced secrets cannot be resolved.
    #[serde(default)]
    pub strict_secrets: bool,
    /// Default concurrency limit when the pipeline sets none.
    #[serde(default)]
    pub max_parallel: Option<usize>,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default = "default_setup_python_command")]
    pub setup_python_command: String,
    #[serde(default = "default_compose_command")]
    pub compose_command: String,
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("tripwire")
}

fn default_setup_python_command() -> String {
    ActionConfig::default().setup_python_command
}

fn default_compose_command() -> String {
    ActionConfig::default().compose_command
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            keep_workspaces: false,
            secrets_file: None,
            strict_secrets: false,
            max_parallel: None,
            output_format: OutputFormat::default(),
            setup_python_command: default_setup_python_command(),
            compose_command: default_compose_command(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl CliConfig {
    /// Load configuration from file, then apply `TRIPWIRE_*` overrides.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::load_file()?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from file only.
    pub fn load_file() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("dev", "tripwire", "tripwire")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, key) in [
            ("TRIPWIRE_WORK_DIR", "work_dir"),
            ("TRIPWIRE_SECRETS_FILE", "secrets_file"),
            ("TRIPWIRE_OUTPUT_FORMAT", "output_format"),
        ] {
            if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                self.set(key, &value)
                    .map_err(|e| format!("{}: {}", var, e))?;
            }
        }
        Ok(())
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "work_dir" => self.work_dir = PathBuf::from(value),
            "keep_workspaces" => self.keep_workspaces = parse_bool(value)?,
            "secrets_file" => self.secrets_file = Some(PathBuf::from(value)),
            "strict_secrets" => self.strict_secrets = parse_bool(value)?,
            "max_parallel" => {
                self.max_parallel = match value.parse::<usize>() {
                    Ok(0) | Err(_) => return Err(format!("Invalid max_parallel: {}", value)),
                    Ok(n) => Some(n),
                };
            }
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            "setup_python_command" => self.setup_python_command = value.to_string(),
            "compose_command" => self.compose_command = value.to_string(),
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }

    pub fn action_config(&self) -> ActionConfig {
        ActionConfig {
            setup_python_command: self.setup_python_command.clone(),
            compose_command: self.compose_command.clone(),
        }
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(format!("Invalid boolean: {}", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: CliConfig = serde_yaml::from_str("strict_secrets: true\n").unwrap();
        assert!(config.strict_secrets);
        assert_eq!(config.compose_command, "docker-compose");
        assert_eq!(config.output_format, OutputFormat::Table);
    }

    #[test]
    fn test_set_values() {
        let mut config = CliConfig::default();
        config.set("max_parallel", "2").unwrap();
        config.set("output_format", "json").unwrap();
        config.set("compose_command", "docker compose").unwrap();

        assert_eq!(config.max_parallel, Some(2));
        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.action_config().compose_command, "docker compose");

        assert!(config.set("max_parallel", "0").is_err());
        assert!(config.set("output_format", "yaml").is_err());
        assert!(config.set("api_url", "http://x").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars = HashMap::from([
            ("TRIPWIRE_WORK_DIR", "/var/tmp/tw"),
            ("TRIPWIRE_OUTPUT_FORMAT", "json"),
        ]);
        let mut config = CliConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.work_dir, PathBuf::from("/var/tmp/tw"));
        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.secrets_file, None);
    }

    #[test]
    fn test_env_override_rejects_bad_value() {
        let mut config = CliConfig::default();
        let err = config
            .apply_env(|k| (k == "TRIPWIRE_OUTPUT_FORMAT").then(|| "xml".to_string()))
            .unwrap_err();
        assert!(err.starts_with("TRIPWIRE_OUTPUT_FORMAT"));
    }
}
