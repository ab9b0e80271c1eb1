//! Secret store port and the built-in providers.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Supplies named secret values at step-dispatch time.
///
/// The engine never logs or persists resolved values unredacted; a missing
/// required secret surfaces as a step failure, not a whole-run abort.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Look up a secret. `Ok(None)` means the store has no such entry.
    async fn get(&self, name: &str) -> Result<Option<String>>;
}

/// In-memory store, used by CLI `--secret` flags and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }
}

#[async_trait]
impl SecretStore for StaticSecrets {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.values.get(name).cloned())
    }
}

/// Store backed by the process environment, with an optional name prefix.
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets {
    prefix: Option<String>,
}

impl EnvSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

#[async_trait]
impl SecretStore for EnvSecrets {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        let key = match &self.prefix {
            Some(p) => format!("{}{}", p, name),
            None => name.to_string(),
        };
        Ok(std::env::var(&key).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_store_resolves_and_misses() {
        let mut store = StaticSecrets::new();
        store.insert("REGISTRY_TOKEN", "hunter2");

        assert_eq!(
            store.get("REGISTRY_TOKEN").await.unwrap(),
            Some("hunter2".to_string())
        );
        assert_eq!(store.get("MISSING").await.unwrap(), None);
    }

    #[tokio::test]
    async fn env_store_applies_prefix() {
        // Unique name to avoid cross-test interference.
        unsafe { std::env::set_var("CAPSTAN_TEST_SECRET_A", "v") };
        let store = EnvSecrets::with_prefix("CAPSTAN_TEST_");
        assert_eq!(store.get("SECRET_A").await.unwrap(), Some("v".to_string()));
    }
}
