//! Security domain entities
//!
//! Key handles and AES-256-GCM sealed payloads.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand_chacha::rand_core::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of AES-256 key in bytes
pub const AES_KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Errors raised by the cipher layer
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// AEAD tag mismatch. Deliberately carries no detail about the cause.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid key format: {0}")]
    InvalidFormat(String),

    #[error("Invalid key derivation input: {0}")]
    InvalidKdfInput(String),
}

/// A 256-bit symmetric key that is securely zeroed on drop
///
/// Used both for the persisted device key and for password-derived
/// session keys. Never serialized; `Debug` is redacted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    bytes: [u8; AES_KEY_SIZE],
}

impl VaultKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; AES_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create a key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != AES_KEY_SIZE {
            return Err(KeyError::InvalidKeyLength {
                expected: AES_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key_bytes = [0u8; AES_KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Take ownership of an already-filled key array
    pub(crate) fn from_array(bytes: [u8; AES_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Create a key from a base64-encoded string (the `device-key` record)
    pub fn from_base64(b64: &str) -> Result<Self, KeyError> {
        let mut bytes = STANDARD
            .decode(b64.trim())
            .map_err(|e| KeyError::InvalidFormat(e.to_string()))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Export key as base64 string
    ///
    /// Only the device key is ever exported, and only to its own record.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    /// Get the raw key bytes (use carefully)
    pub(crate) fn as_bytes(&self) -> &[u8; AES_KEY_SIZE] {
        &self.bytes
    }

    fn cipher(&self) -> Result<Aes256Gcm, KeyError> {
        Aes256Gcm::new_from_slice(&self.bytes).map_err(|e| KeyError::EncryptionFailed(e.to_string()))
    }

    /// Seal `plaintext` under this key with a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedBlob, KeyError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| KeyError::EncryptionFailed(e.to_string()))?;

        Ok(EncryptedBlob { nonce, ciphertext })
    }

    /// Open a blob sealed under this key
    ///
    /// Fails closed on any tag mismatch; a wrong key and a corrupted blob
    /// produce the same error.
    pub fn open(&self, blob: &EncryptedBlob) -> Result<Vec<u8>, KeyError> {
        self.cipher()
            .map_err(|e| KeyError::DecryptionFailed(e.to_string()))?
            .decrypt(Nonce::from_slice(&blob.nonce), blob.ciphertext.as_ref())
            .map_err(|_| {
                KeyError::DecryptionFailed("invalid key or corrupted data".to_string())
            })
    }
}

impl PartialEq for VaultKey {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison is not needed: both operands live in this process.
        self.bytes == other.bytes
    }
}

impl Eq for VaultKey {}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// An AEAD-sealed payload: `nonce (12 bytes) || ciphertext`
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext including the GCM tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    /// Concatenate as `nonce || ciphertext`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split `nonce || ciphertext`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() <= NONCE_SIZE {
            return Err(KeyError::InvalidFormat(format!(
                "sealed payload too short: {} bytes",
                bytes.len()
            )));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Encode as base64(nonce || ciphertext), the persisted record form
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Decode a base64(nonce || ciphertext) record
    pub fn from_base64(b64: &str) -> Result<Self, KeyError> {
        let bytes = STANDARD
            .decode(b64.trim())
            .map_err(|e| KeyError::InvalidFormat(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Split into separate base64 fields, as used by backup sections
    pub fn to_sealed_payload(&self) -> SealedPayload {
        SealedPayload {
            ciphertext: STANDARD.encode(&self.ciphertext),
            nonce: STANDARD.encode(self.nonce),
        }
    }
}

impl std::fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBlob")
            .field("nonce", &hex::encode(self.nonce))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Structured form of an [`EncryptedBlob`] with separate base64 fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// The encrypted data including tag (base64 encoded)
    pub ciphertext: String,

    /// The nonce used for encryption (base64 encoded)
    pub nonce: String,
}

impl SealedPayload {
    /// Decode back into a blob
    pub fn to_blob(&self) -> Result<EncryptedBlob, KeyError> {
        let ciphertext = STANDARD
            .decode(&self.ciphertext)
            .map_err(|e| KeyError::InvalidFormat(format!("Invalid ciphertext: {}", e)))?;

        let nonce_bytes = STANDARD
            .decode(&self.nonce)
            .map_err(|e| KeyError::InvalidFormat(format!("Invalid nonce: {}", e)))?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(KeyError::InvalidFormat(format!(
                "Invalid nonce length: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            )));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&nonce_bytes);
        Ok(EncryptedBlob { nonce, ciphertext })
    }
}

/// Where the vault's active key comes from
///
/// Resolved at every vault access; never cached across an await.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Persisted device key; password protection disabled
    Device(VaultKey),
    /// Key derived from the user's password, held by the live session
    Password(VaultKey),
}

impl KeySource {
    pub fn key(&self) -> &VaultKey {
        match self {
            Self::Device(key) | Self::Password(key) => key,
        }
    }

    pub fn regime(&self) -> &'static str {
        match self {
            Self::Device(_) => "device",
            Self::Password(_) => "password",
        }
    }
}

/// A string that is securely zeroed when dropped
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureString {
    inner: String,
}

impl SecureString {
    /// Create a new secure string
    pub fn new(s: String) -> Self {
        Self { inner: s }
    }

    /// Get the string value
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Redacted preview showing the last four characters
    pub fn preview(&self) -> String {
        let chars: Vec<char> = self.inner.chars().collect();
        if chars.len() > 4 {
            let suffix: String = chars[chars.len() - 4..].iter().collect();
            format!("***{}", suffix)
        } else {
            "***".to_string()
        }
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureString")
            .field("inner", &"[REDACTED]")
            .finish()
    }
}

impl AsRef<str> for SecureString {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl PartialEq for SecureString {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for SecureString {}

impl PartialEq<&str> for SecureString {
    fn eq(&self, other: &&str) -> bool {
        self.inner == *other
    }
}
