//! Vault key rotation
//!
//! Re-encrypts the stored secret blob from one key to another. The blob is
//! replaced by a single write after the old key has opened it, so a failure
//! under the old key leaves storage untouched.

use std::sync::Arc;

use zeroize::Zeroizing;

use super::entity::{EncryptedBlob, VaultKey};
use super::repository::{ENCRYPTED_VAULT_RECORD, KeyValueStore};
use crate::error::{Error, Result};

pub struct KeyRotation {
    store: Arc<dyn KeyValueStore>,
}

impl KeyRotation {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Move the vault from `old_key` to `new_key`
    ///
    /// Returns `false` when there is no blob to rotate.
    ///
    /// # Errors
    ///
    /// `Error::WrongKeyOrCorrupted` if `old_key` does not open the blob; the
    /// stored blob is left as it was.
    pub async fn reencrypt(&self, old_key: &VaultKey, new_key: &VaultKey) -> Result<bool> {
        let Some(encoded) = self.store.get(ENCRYPTED_VAULT_RECORD).await? else {
            tracing::debug!("No vault blob to rotate");
            return Ok(false);
        };

        let blob = EncryptedBlob::from_base64(&encoded).map_err(|_| Error::WrongKeyOrCorrupted)?;
        let plaintext = Zeroizing::new(old_key.open(&blob)?);
        let rotated = new_key.seal(&plaintext)?;

        self.store
            .set(ENCRYPTED_VAULT_RECORD, &rotated.to_base64())
            .await?;
        tracing::info!("Re-encrypted vault under new key");
        Ok(true)
    }
}
