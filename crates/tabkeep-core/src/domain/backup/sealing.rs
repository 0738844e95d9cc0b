//! Per-section backup encryption
//!
//! The bundle password is independent of the vault password: each bundle
//! gets its own salt, and the live session plays no part.

use zeroize::Zeroizing;

use crate::domain::security::{SealedPayload, VaultKey, derive_key_async};
use crate::error::Result;

/// Key derived once per bundle from the export password
pub struct SectionSealer {
    key: VaultKey,
}

impl SectionSealer {
    pub async fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Self> {
        let key = derive_key_async(password, salt, iterations).await?;
        Ok(Self { key })
    }

    /// Seal with a fresh nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedPayload> {
        Ok(self.key.seal(plaintext)?.to_sealed_payload())
    }

    /// Open a sealed section; a wrong password fails closed
    pub fn open(&self, payload: &SealedPayload) -> Result<Zeroizing<Vec<u8>>> {
        let blob = payload.to_blob()?;
        Ok(Zeroizing::new(self.key.open(&blob)?))
    }
}

/// Seal one section, deriving the key from `password` and `salt`
pub async fn seal_section(
    plaintext: &[u8],
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<SealedPayload> {
    SectionSealer::derive(password, salt, iterations)
        .await?
        .seal(plaintext)
}

/// Open one section sealed by [`seal_section`]
pub async fn open_section(
    payload: &SealedPayload,
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<Vec<u8>>> {
    SectionSealer::derive(password, salt, iterations)
        .await?
        .open(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::security::generate_salt;
    use crate::error::Error;

    const FAST: u32 = 1_000;

    #[tokio::test]
    async fn test_seal_then_open() {
        let salt = generate_salt();
        let sealed = seal_section(br#"{"openai":"sk-x"}"#, "export-pass", &salt, FAST)
            .await
            .unwrap();
        let opened = open_section(&sealed, "export-pass", &salt, FAST)
            .await
            .unwrap();
        assert_eq!(opened.as_slice(), br#"{"openai":"sk-x"}"#);
    }

    #[tokio::test]
    async fn test_wrong_password_fails_closed() {
        let salt = generate_salt();
        let sealed = seal_section(b"notes", "export-pass", &salt, FAST)
            .await
            .unwrap();
        let result = open_section(&sealed, "other-pass", &salt, FAST).await;
        assert!(matches!(result, Err(Error::WrongKeyOrCorrupted)));
    }

    #[tokio::test]
    async fn test_salt_is_part_of_the_key() {
        let sealed = seal_section(b"notes", "export-pass", &generate_salt(), FAST)
            .await
            .unwrap();
        let result = open_section(&sealed, "export-pass", &generate_salt(), FAST).await;
        assert!(matches!(result, Err(Error::WrongKeyOrCorrupted)));
    }

    #[tokio::test]
    async fn test_sections_get_distinct_nonces() {
        let sealer = SectionSealer::derive("export-pass", &generate_salt(), FAST)
            .await
            .unwrap();
        let a = sealer.seal(b"same").unwrap();
        let b = sealer.seal(b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
