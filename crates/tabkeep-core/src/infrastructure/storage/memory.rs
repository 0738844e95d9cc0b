//! In-memory record store

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::security::KeyValueStore;
use crate::error::Result;

/// In-memory key-value store
///
/// Records are lost when the value is dropped. Suitable for tests and for
/// sessions that must leave nothing behind.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    records: Mutex<BTreeMap<String, String>>,
}

impl InMemoryKeyValueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.records().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.records().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.records().remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .records()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
