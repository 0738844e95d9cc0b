//! Persisted password-protection settings
//!
//! A single versionless record. Absent means protection has never been
//! enabled and the device-key regime is in force.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::kdf::DEFAULT_ITERATIONS;
use super::repository::{KeyValueStore, SECURITY_CONFIG_RECORD};
use crate::error::Result;

/// Default inactivity timeout for an unlocked session
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: u64 = 15;

/// Parameters applied when protection is enabled or the password changes
///
/// Taken from the application config; a stored [`SecurityConfig`] keeps the
/// iteration count it was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecuritySettings {
    pub kdf_iterations: u32,
    pub session_timeout_minutes: u64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_ITERATIONS,
            session_timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
        }
    }
}

/// Password-protection settings as stored under `security-config`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    pub enabled: bool,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub session_timeout_minutes: u64,
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

/// Loads and saves [`SecurityConfig`]
///
/// No validation beyond shape.
#[derive(Clone)]
pub struct SecurityConfigStore {
    store: Arc<dyn KeyValueStore>,
}

impl SecurityConfigStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Option<SecurityConfig>> {
        match self.store.get(SECURITY_CONFIG_RECORD).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, config: &SecurityConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        self.store.set(SECURITY_CONFIG_RECORD, &json).await
    }

    /// False when no config has ever been saved
    pub async fn is_enabled(&self) -> Result<bool> {
        Ok(self.load().await?.is_some_and(|config| config.enabled))
    }
}
