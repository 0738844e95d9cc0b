//! Password-based key derivation using PBKDF2-HMAC-SHA256.
//!
//! Turns a password, a salt and an iteration count into a 256-bit AES-GCM key.
//! Derivation is deterministic and side-effect free apart from zeroing the
//! transient copy of the password bytes once the key has been produced.

use aes_gcm::aead::OsRng;
use pbkdf2::pbkdf2_hmac;
use rand_chacha::rand_core::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::entity::{AES_KEY_SIZE, KeyError, VaultKey};

/// Default PBKDF2 iteration count for new configurations.
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// Highest iteration count accepted from configuration or a backup file.
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// Salt length in bytes for new configurations.
pub const SALT_SIZE: usize = 32;

/// Generate a fresh random salt.
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a vault key from a password.
///
/// # Errors
///
/// Returns `KeyError::InvalidKdfInput` for an empty salt or a zero iteration
/// count. Any password, including an empty one, derives a key.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Result<VaultKey, KeyError> {
    let password = Zeroizing::new(password.as_bytes().to_vec());
    derive_from_bytes(&password, salt, iterations)
}

fn derive_from_bytes(password: &[u8], salt: &[u8], iterations: u32) -> Result<VaultKey, KeyError> {
    if salt.is_empty() {
        return Err(KeyError::InvalidKdfInput("salt cannot be empty".to_string()));
    }
    if iterations == 0 {
        return Err(KeyError::InvalidKdfInput(
            "iteration count must be positive".to_string(),
        ));
    }

    let mut key_bytes = [0u8; AES_KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key_bytes);
    Ok(VaultKey::from_array(key_bytes))
}

/// Derive a key on the blocking pool so the async caller only suspends.
///
/// The password is copied into a zeroizing buffer that is wiped when the
/// blocking task finishes, whether or not derivation succeeded.
pub async fn derive_key_async(
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<VaultKey, KeyError> {
    let password = Zeroizing::new(password.as_bytes().to_vec());
    let salt = salt.to_vec();

    tokio::task::spawn_blocking(move || derive_from_bytes(&password, &salt, iterations))
        .await
        .map_err(|e| KeyError::InvalidKdfInput(format!("Task join error: {}", e)))?
}
