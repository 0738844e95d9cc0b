//! Session lifecycle
//!
//! Holds the password-derived key in memory only, tracks when the session was
//! unlocked and enforces the inactivity timeout lazily: a status check that
//! finds the timeout elapsed locks the session as a side effect.
//!
//! While protection is disabled the session is always considered unlocked and
//! never holds a key; the vault uses the device key instead.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::time::{Duration, Instant};
use zeroize::Zeroizing;

use super::config::{SecurityConfig, SecurityConfigStore, SecuritySettings};
use super::entity::{EncryptedBlob, VaultKey};
use super::event::{EventLog, SecurityEvent};
use super::kdf;
use super::repository::{ENCRYPTED_VAULT_RECORD, KeyValueStore, VERIFICATION_TOKEN_RECORD};
use crate::error::{Error, Result};

/// Known plaintext sealed into the verification token
pub(crate) const VERIFICATION_PLAINTEXT: &[u8] = b"tabkeep-verification-v1";

#[derive(Default)]
struct SessionState {
    derived_key: Option<VaultKey>,
    unlocked_at: Option<Instant>,
    unlocked_at_utc: Option<DateTime<Utc>>,
}

impl SessionState {
    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A freshly derived password key that has not been committed yet
///
/// Produced by [`SessionManager::begin_password`]. Re-encryption of existing
/// secrets happens between begin and commit so the config is written last.
pub struct PendingPassword {
    config: SecurityConfig,
    key: VaultKey,
}

impl PendingPassword {
    pub fn key(&self) -> &VaultKey {
        &self.key
    }
}

/// Point-in-time view of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub protection_enabled: bool,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub timeout_minutes: Option<u64>,
}

/// Owner of the in-memory session key
///
/// One instance per application, shared by handle. The stored
/// [`SecurityConfig`] is cached at construction and kept in sync with this
/// manager's own writes, so status checks are synchronous.
pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    config_store: SecurityConfigStore,
    settings: SecuritySettings,
    config: Mutex<Option<SecurityConfig>>,
    state: Mutex<SessionState>,
    events: Arc<EventLog>,
}

impl SessionManager {
    /// Load the stored config and start in the locked state
    ///
    /// An enabled config whose timeout differs from `settings` is updated to
    /// the configured timeout.
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        settings: SecuritySettings,
        events: Arc<EventLog>,
    ) -> Result<Self> {
        let config_store = SecurityConfigStore::new(store.clone());
        let mut config = config_store.load().await?;

        if let Some(existing) = config.as_mut() {
            if existing.enabled && existing.session_timeout_minutes != settings.session_timeout_minutes
            {
                existing.session_timeout_minutes = settings.session_timeout_minutes;
                config_store.save(existing).await?;
                tracing::debug!(
                    timeout_minutes = settings.session_timeout_minutes,
                    "Updated session timeout"
                );
            }
        }

        Ok(Self {
            store,
            config_store,
            settings,
            config: Mutex::new(config),
            state: Mutex::new(SessionState::default()),
            events,
        })
    }

    fn config(&self) -> MutexGuard<'_, Option<SecurityConfig>> {
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn settings(&self) -> SecuritySettings {
        self.settings
    }

    /// The cached stored config, if protection was ever enabled
    pub fn security_config(&self) -> Option<SecurityConfig> {
        self.config().clone()
    }

    pub fn is_protection_enabled(&self) -> bool {
        self.config().as_ref().is_some_and(|c| c.enabled)
    }

    /// Timeout of the password regime, `None` while protection is disabled
    fn enabled_timeout(&self) -> Option<u64> {
        self.config()
            .as_ref()
            .filter(|c| c.enabled)
            .map(|c| c.session_timeout_minutes)
    }

    /// Lock `state` if its timeout has elapsed; returns whether it is still unlocked
    fn check_expiry(&self, state: &mut SessionState, timeout_minutes: u64) -> bool {
        let Some(unlocked_at) = state.unlocked_at else {
            return false;
        };
        if unlocked_at.elapsed() >= Duration::from_secs(timeout_minutes.saturating_mul(60)) {
            state.clear();
            self.events
                .record(SecurityEvent::session_expired(timeout_minutes));
            tracing::info!(timeout_minutes, "Session expired after inactivity");
            return false;
        }
        true
    }

    /// Whether secrets are accessible right now
    ///
    /// Always true while protection is disabled.
    pub fn is_unlocked(&self) -> bool {
        let Some(timeout) = self.enabled_timeout() else {
            return true;
        };
        let mut state = self.state();
        self.check_expiry(&mut state, timeout)
    }

    /// Copy of the session key, `None` when locked, expired or unprotected
    pub fn derived_key(&self) -> Option<VaultKey> {
        let timeout = self.enabled_timeout()?;
        let mut state = self.state();
        if self.check_expiry(&mut state, timeout) {
            state.derived_key.clone()
        } else {
            None
        }
    }

    /// Restart the inactivity timer without re-deriving the key
    ///
    /// Returns false when there is no live session to extend.
    pub fn refresh(&self) -> bool {
        let Some(timeout) = self.enabled_timeout() else {
            return true;
        };
        let mut state = self.state();
        if !self.check_expiry(&mut state, timeout) {
            return false;
        }
        state.unlocked_at = Some(Instant::now());
        state.unlocked_at_utc = Some(Utc::now());
        true
    }

    /// Drop the session key unconditionally
    ///
    /// Only a lock that actually drops a key is recorded.
    pub fn lock(&self) {
        let dropped = {
            let mut state = self.state();
            let held = state.derived_key.is_some();
            state.clear();
            held
        };
        if dropped {
            self.events.record(SecurityEvent::locked());
            tracing::info!("Session locked");
        }
    }

    fn hold_key(&self, key: VaultKey) {
        let mut state = self.state();
        state.derived_key = Some(key);
        state.unlocked_at = Some(Instant::now());
        state.unlocked_at_utc = Some(Utc::now());
    }

    /// Derive a candidate key and check it against stored ciphertext
    ///
    /// Decrypts the real vault blob when present, otherwise the verification
    /// token. With neither present nothing can vouch for the password and the
    /// check fails closed. A wrong password and a corrupted blob both yield
    /// `Ok(None)`.
    pub async fn verify_password(&self, password: &str) -> Result<Option<VaultKey>> {
        let config = self
            .security_config()
            .filter(|c| c.enabled)
            .ok_or(Error::ProtectionNotEnabled)?;

        let candidate = kdf::derive_key_async(password, &config.salt, config.iterations).await?;

        let verified = if let Some(blob) = self.store.get(ENCRYPTED_VAULT_RECORD).await? {
            opens(&candidate, &blob).is_some()
        } else if let Some(token) = self.store.get(VERIFICATION_TOKEN_RECORD).await? {
            opens(&candidate, &token).is_some_and(|plain| plain.as_slice() == VERIFICATION_PLAINTEXT)
        } else {
            tracing::warn!("No vault or verification token to check the password against");
            false
        };

        Ok(verified.then_some(candidate))
    }

    /// Try a password; an incorrect one returns `Ok(false)` and leaves the
    /// session as it was
    pub async fn unlock(&self, password: &str) -> Result<bool> {
        if !self.is_protection_enabled() {
            return Ok(true);
        }

        match self.verify_password(password).await? {
            Some(key) => {
                self.hold_key(key);
                self.events.record(SecurityEvent::unlocked());
                tracing::info!("Session unlocked");
                Ok(true)
            }
            None => {
                self.events.record(SecurityEvent::unlock_failed());
                tracing::warn!("Unlock rejected: incorrect password");
                Ok(false)
            }
        }
    }

    /// Generate a fresh salt and derive a key for a new password
    pub async fn begin_password(&self, password: &str) -> Result<PendingPassword> {
        if password.is_empty() {
            return Err(Error::InvalidInput("Password cannot be empty".to_string()));
        }

        let salt = kdf::generate_salt();
        let key = kdf::derive_key_async(password, &salt, self.settings.kdf_iterations).await?;

        Ok(PendingPassword {
            config: SecurityConfig {
                enabled: true,
                salt,
                iterations: self.settings.kdf_iterations,
                session_timeout_minutes: self.settings.session_timeout_minutes,
            },
            key,
        })
    }

    /// Persist the verification token and config, then unlock with the new key
    pub async fn commit_password(&self, pending: PendingPassword) -> Result<()> {
        let PendingPassword { config, key } = pending;

        let token = key.seal(VERIFICATION_PLAINTEXT)?;
        self.store
            .set(VERIFICATION_TOKEN_RECORD, &token.to_base64())
            .await?;
        self.config_store.save(&config).await?;

        *self.config() = Some(config);
        self.hold_key(key);
        Ok(())
    }

    /// Flip the stored config to disabled, keeping salt and iterations
    ///
    /// Does not touch the vault blob.
    pub async fn disable_protection(&self) -> Result<()> {
        let mut config = self
            .security_config()
            .filter(|c| c.enabled)
            .ok_or(Error::ProtectionNotEnabled)?;
        config.enabled = false;

        self.config_store.save(&config).await?;
        *self.config() = Some(config);
        self.state().clear();
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        let Some(timeout) = self.enabled_timeout() else {
            return SessionStatus {
                protection_enabled: false,
                unlocked: true,
                unlocked_at: None,
                expires_at: None,
                timeout_minutes: None,
            };
        };

        let mut state = self.state();
        let unlocked = self.check_expiry(&mut state, timeout);
        let unlocked_at = state.unlocked_at_utc.filter(|_| unlocked);
        let expires_at = unlocked_at.and_then(|at| {
            i64::try_from(timeout)
                .ok()
                .map(|minutes| at + chrono::Duration::minutes(minutes))
        });

        SessionStatus {
            protection_enabled: true,
            unlocked,
            unlocked_at,
            expires_at,
            timeout_minutes: Some(timeout),
        }
    }
}

/// Decode and open a base64 record, `None` on any failure
fn opens(key: &VaultKey, record: &str) -> Option<Zeroizing<Vec<u8>>> {
    EncryptedBlob::from_base64(record)
        .and_then(|blob| key.open(&blob))
        .ok()
        .map(Zeroizing::new)
}
