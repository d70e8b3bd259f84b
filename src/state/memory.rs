//! In-memory state store, used by tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::StateStore;

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the given entries
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        Self {
            values: RwLock::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// Copy of every stored entry
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, serde_json::Value> {
        self.values
            .read()
            .map(|values| values.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let values = self
            .values
            .read()
            .map_err(|e| anyhow::anyhow!("state lock poisoned: {e}"))?;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|e| anyhow::anyhow!("state lock poisoned: {e}"))?;
        values.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let values = self
            .values
            .read()
            .map_err(|e| anyhow::anyhow!("state lock poisoned: {e}"))?;
        Ok(values
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
