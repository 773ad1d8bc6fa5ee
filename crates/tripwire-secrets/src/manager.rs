//! Secret manager for resolving and caching secrets.

use crate::providers::SecretProvider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use tripwire_core::{Error, Result};

/// Configuration for the secret manager.
#[derive(Debug, Clone, Default)]
pub struct SecretManagerConfig {
    /// Fail resolution when no provider has the secret. When false, a
    /// missing secret resolves to the empty string.
    pub strict: bool,
}

/// Secret manager resolving names through an ordered provider chain.
///
/// Resolved values are cached for the life of the manager, so every job of
/// a run sees the same value.
pub struct SecretManager {
    config: SecretManagerConfig,
    providers: Vec<Arc<dyn SecretProvider>>,
    cache: RwLock<HashMap<String, String>>,
}

impl SecretManager {
    /// Create a new secret manager.
    pub fn new(config: SecretManagerConfig) -> Self {
        Self {
            config,
            providers: Vec::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register a secret provider. Earlier providers win.
    pub fn register_provider(&mut self, provider: Arc<dyn SecretProvider>) {
        info!(provider = %provider.name(), "Registering secret provider");
        self.providers.push(provider);
    }

    /// Resolve a single secret by name.
    pub async fn resolve(&self, name: &str) -> Result<String> {
        if let Some(cached) = self.cache.read().await.get(name) {
            debug!(name = %name, "Secret cache hit");
            return Ok(cached.clone());
        }

        if self.providers.is_empty() && self.config.strict {
            return Err(Error::SecretProviderNotConfigured(name.to_string()));
        }

        for provider in &self.providers {
            if let Some(value) = provider.lookup(name).await? {
                debug!(name = %name, provider = %provider.name(), "Secret resolved");
                self.cache
                    .write()
                    .await
                    .insert(name.to_string(), value.clone());
                return Ok(value);
            }
        }

        if self.config.strict {
            return Err(Error::SecretNotFound(name.to_string()));
        }

        warn!(name = %name, "Secret not found in any provider, using empty value");
        Ok(String::new())
    }

    /// Resolve multiple secrets into a name/value map.
    pub async fn resolve_all<'a, I>(&self, names: I) -> Result<HashMap<String, String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut result = HashMap::new();
        for name in names {
            let value = self.resolve(name).await?;
            result.insert(name.to_string(), value);
        }
        Ok(result)
    }
}

impl Default for SecretManager {
    fn default() -> Self {
        Self::new(SecretManagerConfig::default())
    }
}
