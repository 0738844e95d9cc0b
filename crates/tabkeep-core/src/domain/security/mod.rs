//! Security domain module
//!
//! Keeps provider API keys encrypted at rest on an untrusted device.
//!
//! # Architecture
//!
//! - **Entities**: `VaultKey`, `EncryptedBlob`, `KeySource`, `SecureString`
//! - **Key derivation**: PBKDF2-HMAC-SHA256 in `kdf`
//! - **Session**: `SessionManager` holds the password-derived key in memory
//! - **Vault**: `SecretVault` seals the credential map, `KeyRotation` moves it
//!   between keys
//! - **Services**: `SecurityService` as the single entry point
//!
//! # Key regimes
//!
//! - Device: a random key persisted next to the data, the default
//! - Password: a key derived from the user's password, never persisted
//!
//! # Example
//!
//! ```ignore
//! use tabkeep_core::domain::security::{SecurityService, SecuritySettings};
//! use tabkeep_core::infrastructure::storage::SqliteKeyValueStore;
//!
//! let store = Arc::new(SqliteKeyValueStore::connect(&db_path).await?);
//! let service = SecurityService::open(store, SecuritySettings::default()).await?;
//!
//! service.set_secret("openai", "sk-xxx").await?;
//! service.setup_password("Str0ng!Pass").await?;
//!
//! // Later, after a restart
//! if service.unlock_with_password("Str0ng!Pass").await? {
//!     let key = service.get_secret("openai").await?;
//! }
//! ```

pub mod config;
pub mod entity;
pub mod event;
pub mod kdf;
pub mod password;
pub mod repository;
pub mod rotation;
pub mod service;
pub mod session;
pub mod vault;

// Re-export entity types
pub use entity::{EncryptedBlob, KeyError, KeySource, SealedPayload, SecureString, VaultKey};

pub use config::{
    DEFAULT_SESSION_TIMEOUT_MINUTES, SecurityConfig, SecurityConfigStore, SecuritySettings,
};
pub use event::{EventLog, SecurityEvent, SecurityEventType};
pub use kdf::{DEFAULT_ITERATIONS, MAX_ITERATIONS, derive_key, derive_key_async, generate_salt};
pub use password::{PasswordStrength, validate_password_strength};
pub use repository::KeyValueStore;
pub use rotation::KeyRotation;
pub use service::{SecretInfo, SecurityService, SecurityStatus};
pub use session::{SessionManager, SessionStatus};
pub use vault::{KNOWN_SECRETS, MigrationOutcome, SecretRecord, SecretVault};
