//! Security domain services
//!
//! [`SecurityService`] is the one long-lived owner of the session and the
//! vault. Everything else in the application asks it whether protection is
//! on, whether the session is unlocked, and for the secrets themselves.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{
    config::SecuritySettings,
    entity::{SecureString, VaultKey},
    event::{EventLog, SecurityEvent},
    password::{PasswordStrength, validate_password_strength},
    repository::KeyValueStore,
    rotation::KeyRotation,
    session::SessionManager,
    vault::{MigrationOutcome, SecretRecord, SecretVault},
};
use crate::error::{Error, Result};

/// Snapshot of protection and session state for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityStatus {
    pub protection_enabled: bool,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub timeout_minutes: Option<u64>,
    pub has_secrets: bool,
}

/// Information about a stored secret (without the actual value)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretInfo {
    /// Provider slot name
    pub name: String,
    /// Redacted preview (e.g., "***1234")
    pub preview: String,
}

/// Service for the secrets vault and its session
///
/// # Security Model
///
/// - Secrets are sealed with AES-256-GCM into one blob
/// - The key is a persisted device key until a password is set, then a
///   PBKDF2-derived key that only ever lives in memory
/// - Switching between the two re-encrypts the blob before the config flips
/// - Decrypted values are returned as `SecureString` which is zeroized on drop
///
/// # Example
///
/// ```ignore
/// let service = SecurityService::open(store, SecuritySettings::default()).await?;
///
/// service.setup_password("Str0ng!Pass").await?;
/// service.set_secret("openai", "sk-xxx").await?;
///
/// service.lock_session();
/// assert!(service.unlock_with_password("Str0ng!Pass").await?);
/// ```
pub struct SecurityService {
    store: Arc<dyn KeyValueStore>,
    session: Arc<SessionManager>,
    vault: SecretVault,
    rotation: KeyRotation,
    events: Arc<EventLog>,
}

impl SecurityService {
    /// Build the service over `store` and run the legacy migration
    pub async fn open(store: Arc<dyn KeyValueStore>, settings: SecuritySettings) -> Result<Self> {
        let events = Arc::new(EventLog::default());
        let session =
            Arc::new(SessionManager::open(store.clone(), settings, events.clone()).await?);
        let vault = SecretVault::new(store.clone(), session.clone(), events.clone());
        let rotation = KeyRotation::new(store.clone());

        let service = Self {
            store,
            session,
            vault,
            rotation,
            events,
        };
        service.migrate_legacy_secrets().await?;
        Ok(service)
    }

    /// The underlying record store
    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    pub fn vault(&self) -> &SecretVault {
        &self.vault
    }

    /// KDF and timeout parameters this service was opened with
    pub fn settings(&self) -> SecuritySettings {
        self.session.settings()
    }

    pub fn is_password_protection_enabled(&self) -> bool {
        self.session.is_protection_enabled()
    }

    pub fn is_session_unlocked(&self) -> bool {
        self.session.is_unlocked()
    }

    /// The live session key; `None` when locked or in the device regime
    pub fn get_derived_key(&self) -> Option<VaultKey> {
        self.session.derived_key()
    }

    pub fn lock_session(&self) {
        self.session.lock();
    }

    /// Extend the session on user activity
    pub fn refresh_session(&self) -> bool {
        self.session.refresh()
    }

    /// Unlock with `password`; `Ok(false)` for an incorrect password
    ///
    /// A successful unlock also completes a migration that was deferred
    /// because the session was locked.
    pub async fn unlock_with_password(&self, password: &str) -> Result<bool> {
        if !self.session.unlock(password).await? {
            return Ok(false);
        }
        if self.is_password_protection_enabled() {
            self.migrate_legacy_secrets().await?;
        }
        Ok(true)
    }

    /// Turn on password protection
    ///
    /// Always mints a fresh salt. An existing device-key vault is re-encrypted
    /// under the new key before the config is written, then the device key is
    /// deleted.
    ///
    /// # Errors
    ///
    /// `Error::ProtectionAlreadyEnabled` if a password is already set; use
    /// [`Self::change_password`].
    pub async fn setup_password(&self, password: &str) -> Result<()> {
        if self.is_password_protection_enabled() {
            return Err(Error::ProtectionAlreadyEnabled);
        }

        let pending = self.session.begin_password(password).await?;

        match self.vault.load_device_key().await? {
            Some(device_key) => {
                if self.rotation.reencrypt(&device_key, pending.key()).await? {
                    self.events
                        .record(SecurityEvent::secrets_rotated("device", "password"));
                }
            }
            None if self.vault.has_secrets().await? => {
                tracing::error!("Vault blob exists but no device key can open it");
                return Err(Error::WrongKeyOrCorrupted);
            }
            None => {}
        }

        let iterations = self.session.settings().kdf_iterations;
        self.session.commit_password(pending).await?;
        self.vault.remove_device_key().await?;

        self.events
            .record(SecurityEvent::protection_enabled(iterations));
        tracing::info!(iterations, "Password protection enabled");
        Ok(())
    }

    /// Replace the password, re-encrypting existing secrets
    ///
    /// Returns `Ok(false)` without changing anything if `old_password` is
    /// incorrect.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<bool> {
        if !self.is_password_protection_enabled() {
            return Err(Error::ProtectionNotEnabled);
        }

        let Some(old_key) = self.session.verify_password(old_password).await? else {
            self.events.record(SecurityEvent::unlock_failed());
            tracing::warn!("Password change rejected: incorrect current password");
            return Ok(false);
        };

        let pending = self.session.begin_password(new_password).await?;
        if self.rotation.reencrypt(&old_key, pending.key()).await? {
            self.events
                .record(SecurityEvent::secrets_rotated("password", "password"));
        }
        self.session.commit_password(pending).await?;

        self.events.record(SecurityEvent::password_changed());
        tracing::info!("Password changed");
        Ok(true)
    }

    /// Turn off password protection
    ///
    /// Requires an unlocked session. The vault must open under the session
    /// key before a fresh device key is persisted; the vault is then
    /// re-encrypted under it, and only then is the config flipped to
    /// disabled. A failed rotation removes the new device key again.
    pub async fn disable_password_protection(&self) -> Result<()> {
        if !self.is_password_protection_enabled() {
            return Err(Error::ProtectionNotEnabled);
        }
        let session_key = self.session.derived_key().ok_or(Error::Locked)?;
        self.vault.read_with(&session_key).await?;

        let device_key = VaultKey::generate();
        self.vault.store_device_key(&device_key).await?;
        match self.rotation.reencrypt(&session_key, &device_key).await {
            Ok(true) => self
                .events
                .record(SecurityEvent::secrets_rotated("password", "device")),
            Ok(false) => {}
            Err(e) => {
                self.vault.remove_device_key().await?;
                return Err(e);
            }
        }
        self.session.disable_protection().await?;

        self.events.record(SecurityEvent::protection_disabled());
        tracing::info!("Password protection disabled");
        Ok(())
    }

    pub async fn get_secrets(&self) -> Result<SecretRecord> {
        self.vault.read().await
    }

    pub async fn save_secrets(&self, record: &SecretRecord) -> Result<()> {
        self.vault.write(record).await
    }

    /// Re-encrypt the vault from `old_key` to `new_key`; false if empty
    pub async fn reencrypt_secrets(&self, old_key: &VaultKey, new_key: &VaultKey) -> Result<bool> {
        self.rotation.reencrypt(old_key, new_key).await
    }

    pub fn validate_password_strength(password: &str) -> PasswordStrength {
        validate_password_strength(password)
    }

    pub async fn get_secret(&self, name: &str) -> Result<Option<SecureString>> {
        Ok(self.vault.read().await?.get(name).cloned())
    }

    /// Store one credential; an empty value removes it
    pub async fn set_secret(&self, name: &str, value: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Secret name cannot be empty".to_string()));
        }
        let mut record = self.vault.read().await?;
        record.insert(name, value);
        self.vault.write(&record).await?;
        tracing::info!(secret_name = %name, "Stored secret");
        Ok(())
    }

    /// Returns whether the secret existed
    pub async fn remove_secret(&self, name: &str) -> Result<bool> {
        let mut record = self.vault.read().await?;
        if !record.remove(name) {
            return Ok(false);
        }
        self.vault.write(&record).await?;
        tracing::info!(secret_name = %name, "Removed secret");
        Ok(true)
    }

    /// Names and redacted previews of stored secrets
    pub async fn list_secret_names(&self) -> Result<Vec<SecretInfo>> {
        let record = self.vault.read().await?;
        Ok(record
            .iter()
            .map(|(name, value)| SecretInfo {
                name: name.to_string(),
                preview: value.preview(),
            })
            .collect())
    }

    pub async fn migrate_legacy_secrets(&self) -> Result<MigrationOutcome> {
        self.vault.migrate_legacy_plaintext().await
    }

    pub async fn status(&self) -> Result<SecurityStatus> {
        let session = self.session.status();
        Ok(SecurityStatus {
            protection_enabled: session.protection_enabled,
            unlocked: session.unlocked,
            unlocked_at: session.unlocked_at,
            expires_at: session.expires_at,
            timeout_minutes: session.timeout_minutes,
            has_secrets: self.vault.has_secrets().await?,
        })
    }

    /// Recent security events, oldest first
    pub fn recent_events(&self) -> Vec<SecurityEvent> {
        self.events.recent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::security::event::SecurityEventType;
    use crate::domain::security::repository::{
        DEVICE_KEY_RECORD, ENCRYPTED_VAULT_RECORD, LEGACY_PLAINTEXT_RECORD,
    };
    use crate::infrastructure::storage::InMemoryKeyValueStore;

    fn fast_settings() -> SecuritySettings {
        SecuritySettings {
            kdf_iterations: 1_000,
            session_timeout_minutes: 15,
        }
    }

    async fn service() -> SecurityService {
        SecurityService::open(Arc::new(InMemoryKeyValueStore::new()), fast_settings())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enable_rotates_device_vault() {
        let service = service().await;
        service.set_secret("openai", "sk-device").await.unwrap();
        assert!(service.store.contains(DEVICE_KEY_RECORD).await.unwrap());

        service.setup_password("Str0ng!Pass").await.unwrap();

        assert!(!service.store.contains(DEVICE_KEY_RECORD).await.unwrap());
        let secret = service.get_secret("openai").await.unwrap().unwrap();
        assert_eq!(secret.as_str(), "sk-device");
    }

    #[tokio::test]
    async fn test_setup_twice_rejected() {
        let service = service().await;
        service.setup_password("Str0ng!Pass").await.unwrap();
        assert!(matches!(
            service.setup_password("Another!Pass1").await,
            Err(Error::ProtectionAlreadyEnabled)
        ));
    }

    #[tokio::test]
    async fn test_disable_rotates_to_fresh_device_key() {
        let service = service().await;
        service.setup_password("Str0ng!Pass").await.unwrap();
        service.set_secret("anthropic", "sk-ant").await.unwrap();

        service.disable_password_protection().await.unwrap();

        assert!(!service.is_password_protection_enabled());
        assert!(service.is_session_unlocked());
        assert!(service.get_derived_key().is_none());
        assert!(service.store.contains(DEVICE_KEY_RECORD).await.unwrap());
        let secret = service.get_secret("anthropic").await.unwrap().unwrap();
        assert_eq!(secret.as_str(), "sk-ant");
    }

    #[tokio::test]
    async fn test_disable_requires_unlocked_session() {
        let service = service().await;
        service.setup_password("Str0ng!Pass").await.unwrap();
        service.set_secret("openai", "sk-x").await.unwrap();
        service.lock_session();

        assert!(matches!(
            service.disable_password_protection().await,
            Err(Error::Locked)
        ));
        assert!(service.is_password_protection_enabled());
        assert!(!service.store.contains(DEVICE_KEY_RECORD).await.unwrap());
    }

    #[tokio::test]
    async fn test_disable_with_corrupted_vault_changes_nothing() {
        let service = service().await;
        service.setup_password("Str0ng!Pass").await.unwrap();
        service.set_secret("openai", "sk-x").await.unwrap();
        service
            .store
            .set(ENCRYPTED_VAULT_RECORD, "not-a-blob")
            .await
            .unwrap();

        assert!(matches!(
            service.disable_password_protection().await,
            Err(Error::WrongKeyOrCorrupted)
        ));
        assert!(service.is_password_protection_enabled());
        assert!(!service.store.contains(DEVICE_KEY_RECORD).await.unwrap());
        assert_eq!(
            service.store.get(ENCRYPTED_VAULT_RECORD).await.unwrap().as_deref(),
            Some("not-a-blob")
        );
    }

    #[tokio::test]
    async fn test_reenable_mints_new_salt() {
        let service = service().await;
        service.setup_password("Str0ng!Pass").await.unwrap();
        let first_salt = service.session.security_config().unwrap().salt;
        service.disable_password_protection().await.unwrap();
        service.setup_password("Str0ng!Pass").await.unwrap();
        let second_salt = service.session.security_config().unwrap().salt;

        assert_ne!(first_salt, second_salt);
    }

    #[tokio::test]
    async fn test_change_password_with_empty_vault() {
        let service = service().await;
        service.setup_password("Str0ng!Pass").await.unwrap();
        assert!(service.change_password("Str0ng!Pass", "N3w!Password").await.unwrap());

        service.lock_session();
        assert!(!service.unlock_with_password("Str0ng!Pass").await.unwrap());
        assert!(service.unlock_with_password("N3w!Password").await.unwrap());
    }

    #[tokio::test]
    async fn test_change_password_requires_protection() {
        let service = service().await;
        assert!(matches!(
            service.change_password("a", "b").await,
            Err(Error::ProtectionNotEnabled)
        ));
    }

    #[tokio::test]
    async fn test_secret_helpers() {
        let service = service().await;
        service.set_secret("openai", "sk-1234abcd").await.unwrap();
        service.set_secret("custom-provider", "tok-9999").await.unwrap();

        let listed = service.list_secret_names().await.unwrap();
        assert_eq!(
            listed,
            vec![
                SecretInfo {
                    name: "custom-provider".to_string(),
                    preview: "***9999".to_string(),
                },
                SecretInfo {
                    name: "openai".to_string(),
                    preview: "***abcd".to_string(),
                },
            ]
        );

        assert!(service.remove_secret("openai").await.unwrap());
        assert!(!service.remove_secret("openai").await.unwrap());
        assert!(service.get_secret("openai").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blank_secret_name_rejected() {
        let service = service().await;
        assert!(matches!(
            service.set_secret("  ", "value").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_open_migrates_legacy_plaintext() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        store
            .set(LEGACY_PLAINTEXT_RECORD, r#"{"gemini":"g-key"}"#)
            .await
            .unwrap();

        let service = SecurityService::open(store.clone(), fast_settings())
            .await
            .unwrap();

        assert!(!store.contains(LEGACY_PLAINTEXT_RECORD).await.unwrap());
        assert!(store.contains(ENCRYPTED_VAULT_RECORD).await.unwrap());
        assert_eq!(
            service.get_secret("gemini").await.unwrap().unwrap().as_str(),
            "g-key"
        );
        assert!(
            service
                .recent_events()
                .iter()
                .any(|e| e.event_type == SecurityEventType::SecretsMigrated)
        );
    }

    #[tokio::test]
    async fn test_open_survives_unreadable_legacy_record() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        store
            .set(LEGACY_PLAINTEXT_RECORD, "not json {")
            .await
            .unwrap();

        let service = SecurityService::open(store.clone(), fast_settings())
            .await
            .unwrap();

        assert!(store.contains(LEGACY_PLAINTEXT_RECORD).await.unwrap());
        assert!(!service.status().await.unwrap().protection_enabled);
        service.set_secret("openai", "sk-x").await.unwrap();
        assert_eq!(
            service.get_secret("openai").await.unwrap().unwrap().as_str(),
            "sk-x"
        );
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let service = service().await;
        let status = service.status().await.unwrap();
        assert!(!status.protection_enabled);
        assert!(status.unlocked);
        assert!(!status.has_secrets);

        service.setup_password("Str0ng!Pass").await.unwrap();
        service.set_secret("openai", "sk-x").await.unwrap();
        service.lock_session();

        let status = service.status().await.unwrap();
        assert!(status.protection_enabled);
        assert!(!status.unlocked);
        assert!(status.has_secrets);
        assert_eq!(status.timeout_minutes, Some(15));
    }

    #[tokio::test]
    async fn test_events_never_carry_secrets() {
        let service = service().await;
        service.set_secret("openai", "sk-very-secret").await.unwrap();
        service.setup_password("Str0ng!Pass").await.unwrap();
        service.lock_session();
        service.unlock_with_password("wrong").await.unwrap();

        let dump = serde_json::to_string(&service.recent_events()).unwrap();
        assert!(!dump.contains("sk-very-secret"));
        assert!(!dump.contains("Str0ng!Pass"));
        assert!(dump.contains("unlock_failed"));
    }
}
