//! Encrypted secret vault
//!
//! The provider credential map is stored as one AEAD blob under
//! `secrets-vault-encrypted`. The key is resolved on every access from the
//! session (password regime) or the persisted device key (default regime),
//! and the plaintext map only exists in memory.

use std::collections::BTreeMap;
use std::sync::Arc;

use zeroize::Zeroizing;

use super::entity::{EncryptedBlob, KeySource, SecureString, VaultKey};
use super::event::{EventLog, SecurityEvent};
use super::repository::{
    DEVICE_KEY_RECORD, ENCRYPTED_VAULT_RECORD, KeyValueStore, LEGACY_PLAINTEXT_RECORD,
};
use super::session::SessionManager;
use crate::error::{Error, Result};

/// Provider slot for OpenAI credentials
pub const OPENAI_SECRET: &str = "openai";
/// Provider slot for Anthropic credentials
pub const ANTHROPIC_SECRET: &str = "anthropic";
/// Provider slot for Gemini credentials
pub const GEMINI_SECRET: &str = "gemini";

/// Slots the dashboard knows about; any other name is also accepted
pub const KNOWN_SECRETS: [&str; 3] = [OPENAI_SECRET, ANTHROPIC_SECRET, GEMINI_SECRET];

/// Plaintext provider name to credential map
///
/// Values are zeroized on drop; `Debug` shows names only.
#[derive(Clone, Default, PartialEq)]
pub struct SecretRecord {
    entries: BTreeMap<String, SecureString>,
}

impl SecretRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&SecureString> {
        self.entries.get(name)
    }

    /// Insert or replace a credential; an empty value removes the slot
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if value.is_empty() {
            self.entries.remove(&name);
        } else {
            self.entries.insert(name, SecureString::new(value));
        }
    }

    /// Returns whether the slot existed
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecureString)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serialize to the stored JSON map
    pub(crate) fn to_json(&self) -> Result<Zeroizing<Vec<u8>>> {
        let map: BTreeMap<&str, &str> = self.iter().map(|(k, v)| (k, v.as_str())).collect();
        Ok(Zeroizing::new(serde_json::to_vec(&map)?))
    }

    /// Parse a stored JSON map; null values are dropped
    pub(crate) fn from_json(bytes: &[u8]) -> Result<Self> {
        let map: BTreeMap<String, Option<String>> = serde_json::from_slice(bytes)?;
        let mut record = Self::new();
        for (name, value) in map {
            if let Some(value) = value {
                record.insert(name, value);
            }
        }
        Ok(record)
    }

    /// Parse a JSON value, as carried by backup sections
    pub(crate) fn from_value(value: serde_json::Value) -> Result<Self> {
        let bytes = Zeroizing::new(serde_json::to_vec(&value)?);
        Self::from_json(&bytes)
    }

    /// JSON value for backup sections
    pub(crate) fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.as_str().to_string())))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SecretRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

impl std::fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRecord")
            .field("names", &self.names())
            .finish()
    }
}

/// Result of the legacy cleartext migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No legacy record present
    NothingToMigrate,
    /// Legacy secrets sealed into the vault and the cleartext record removed
    Migrated { count: usize },
    /// Protection is enabled and the session is locked; retried after unlock
    Deferred,
    /// The legacy record is not a JSON map; left in place untouched
    Unreadable,
}

/// Reads and writes the sealed secret map
pub struct SecretVault {
    store: Arc<dyn KeyValueStore>,
    session: Arc<SessionManager>,
    events: Arc<EventLog>,
}

impl SecretVault {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        session: Arc<SessionManager>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            store,
            session,
            events,
        }
    }

    /// Resolve the key that currently protects the vault
    ///
    /// # Errors
    ///
    /// `Error::Locked` when protection is enabled and the session is locked
    /// or expired. In the device regime a key is generated and persisted on
    /// first use.
    pub async fn get_active_key(&self) -> Result<KeySource> {
        if self.session.is_protection_enabled() {
            return self
                .session
                .derived_key()
                .map(KeySource::Password)
                .ok_or(Error::Locked);
        }

        match self.load_device_key().await? {
            Some(key) => Ok(KeySource::Device(key)),
            None => {
                let key = VaultKey::generate();
                self.store_device_key(&key).await?;
                tracing::info!("Generated device key");
                Ok(KeySource::Device(key))
            }
        }
    }

    pub async fn load_device_key(&self) -> Result<Option<VaultKey>> {
        match self.store.get(DEVICE_KEY_RECORD).await? {
            Some(encoded) => Ok(Some(VaultKey::from_base64(&encoded)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn store_device_key(&self, key: &VaultKey) -> Result<()> {
        let encoded = Zeroizing::new(key.to_base64());
        self.store.set(DEVICE_KEY_RECORD, &encoded).await
    }

    pub(crate) async fn remove_device_key(&self) -> Result<()> {
        self.store.remove(DEVICE_KEY_RECORD).await
    }

    /// Whether an encrypted blob is stored
    pub async fn has_secrets(&self) -> Result<bool> {
        self.store.contains(ENCRYPTED_VAULT_RECORD).await
    }

    /// Decrypt the vault; a missing blob is an empty record
    ///
    /// # Errors
    ///
    /// `Error::Locked` as for [`Self::get_active_key`];
    /// `Error::WrongKeyOrCorrupted` when the blob fails verification.
    pub async fn read(&self) -> Result<SecretRecord> {
        let source = self.get_active_key().await?;
        Ok(self.read_with(source.key()).await?.unwrap_or_default())
    }

    /// Seal `record` under the active key with a fresh nonce
    pub async fn write(&self, record: &SecretRecord) -> Result<()> {
        let source = self.get_active_key().await?;
        self.write_with(source.key(), record).await?;
        tracing::debug!(
            key_count = record.len(),
            regime = source.regime(),
            "Saved secrets"
        );
        Ok(())
    }

    /// Decrypt the stored blob under an explicit key, `None` if absent
    pub async fn read_with(&self, key: &VaultKey) -> Result<Option<SecretRecord>> {
        let Some(encoded) = self.store.get(ENCRYPTED_VAULT_RECORD).await? else {
            return Ok(None);
        };
        let blob = EncryptedBlob::from_base64(&encoded).map_err(|_| Error::WrongKeyOrCorrupted)?;
        let plaintext = Zeroizing::new(key.open(&blob)?);
        SecretRecord::from_json(&plaintext).map(Some)
    }

    pub async fn write_with(&self, key: &VaultKey, record: &SecretRecord) -> Result<()> {
        let plaintext = record.to_json()?;
        let blob = key.seal(&plaintext)?;
        self.store
            .set(ENCRYPTED_VAULT_RECORD, &blob.to_base64())
            .await
    }

    /// Seal a legacy cleartext record into the vault and delete it
    ///
    /// Safe to run on every startup. Secrets already in the vault win over
    /// legacy values with the same name. The cleartext record is removed only
    /// after the sealed write succeeds.
    pub async fn migrate_legacy_plaintext(&self) -> Result<MigrationOutcome> {
        let Some(legacy) = self.store.get(LEGACY_PLAINTEXT_RECORD).await? else {
            return Ok(MigrationOutcome::NothingToMigrate);
        };
        let legacy = Zeroizing::new(legacy);

        let source = match self.get_active_key().await {
            Ok(source) => source,
            Err(Error::Locked) => {
                tracing::debug!("Legacy secrets found while locked; migration deferred");
                return Ok(MigrationOutcome::Deferred);
            }
            Err(e) => return Err(e),
        };

        let legacy = match SecretRecord::from_json(legacy.as_bytes()) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Legacy secrets record is unreadable; skipped");
                return Ok(MigrationOutcome::Unreadable);
            }
        };
        let count = legacy.len();

        if count > 0 {
            let mut merged = legacy;
            if let Some(existing) = self.read_with(source.key()).await? {
                for (name, value) in existing.iter() {
                    merged.insert(name, value.as_str());
                }
            }
            self.write_with(source.key(), &merged).await?;
        }

        self.store.remove(LEGACY_PLAINTEXT_RECORD).await?;

        if count == 0 {
            return Ok(MigrationOutcome::NothingToMigrate);
        }

        self.events.record(SecurityEvent::secrets_migrated(count));
        tracing::info!(key_count = count, regime = source.regime(), "Migrated legacy secrets");
        Ok(MigrationOutcome::Migrated { count })
    }
}
