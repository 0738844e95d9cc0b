//! Storage traits for the security domain
//!
//! The vault persists into a plain key-value store. The medium is treated as
//! untrusted: everything sensitive written through it is sealed first, except
//! the device key, which only exists while password protection is disabled.

use async_trait::async_trait;

use crate::error::Result;

/// `SecurityConfig` JSON
pub const SECURITY_CONFIG_RECORD: &str = "security-config";

/// base64(nonce || ciphertext) of a known plaintext
pub const VERIFICATION_TOKEN_RECORD: &str = "security-verification-token";

/// base64(nonce || ciphertext) of the JSON secret map
pub const ENCRYPTED_VAULT_RECORD: &str = "secrets-vault-encrypted";

/// base64(raw 256-bit key)
pub const DEVICE_KEY_RECORD: &str = "device-key";

/// Legacy cleartext JSON secret map, read once for migration then deleted
pub const LEGACY_PLAINTEXT_RECORD: &str = "secrets-vault-plaintext";

/// Persistent string key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a record
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Create or overwrite a record
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a record; deleting a missing record is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// List record names starting with `prefix`, sorted
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check whether a record exists
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
