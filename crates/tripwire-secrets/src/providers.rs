//! Where secret values come from.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tripwire_core::{Error, Result};

/// A source of secret values, consulted by name.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Look up `name`. `Ok(None)` means this provider does not hold it and
    /// the next one in the chain should be asked.
    async fn lookup(&self, name: &str) -> Result<Option<String>>;

    /// Short label used in log fields.
    fn name(&self) -> &str;
}

/// Reads secrets from the process environment, so `DATADIFF_PRESTO_URI`
/// resolves from a variable of the same name (including ones loaded from
/// `.env`).
#[derive(Debug, Default)]
pub struct EnvProvider;

#[async_trait]
impl SecretProvider for EnvProvider {
    async fn lookup(&self, name: &str) -> Result<Option<String>> {
        Ok(std::env::var(name).ok())
    }

    fn name(&self) -> &str {
        "env"
    }
}

/// Secrets loaded once from a JSON object of name/value strings.
#[derive(Debug)]
pub struct FileProvider {
    secrets: HashMap<String, String>,
}

impl FileProvider {
    pub fn from_map(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }

    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Internal(format!(
                "Failed to read secrets file {}: {}",
                path.display(),
                e
            ))
        })?;
        let secrets: HashMap<String, String> = serde_json::from_str(&content)?;
        Ok(Self { secrets })
    }
}

#[async_trait]
impl SecretProvider for FileProvider {
    async fn lookup(&self, name: &str) -> Result<Option<String>> {
        Ok(self.secrets.get(name).cloned())
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_env_provider() {
        // SAFETY: this variable name is unique to this test
        unsafe { std::env::set_var("TRIPWIRE_TEST_PRESTO_URI", "presto://localhost") };

        let provider = EnvProvider;
        assert_eq!(
            provider.lookup("TRIPWIRE_TEST_PRESTO_URI").await.unwrap().as_deref(),
            Some("presto://localhost")
        );
        assert_eq!(provider.lookup("TRIPWIRE_TEST_UNSET").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_provider_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"DATADIFF_PRESTO_URI": "presto://presto@127.0.0.1/postgresql/public"}}"#
        )
        .unwrap();

        let provider = FileProvider::load_from_file(file.path()).await.unwrap();
        assert_eq!(
            provider.lookup("DATADIFF_PRESTO_URI").await.unwrap().as_deref(),
            Some("presto://presto@127.0.0.1/postgresql/public")
        );
        assert_eq!(provider.lookup("DATADIFF_SNOWFLAKE_URI").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_provider_rejects_non_object() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2, 3]").unwrap();
        assert!(FileProvider::load_from_file(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_file_provider_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileProvider::load_from_file(&dir.path().join("secrets.json")).await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }
}
