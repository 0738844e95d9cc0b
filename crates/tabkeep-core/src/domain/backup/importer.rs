//! Backup import
//!
//! Nothing is applied until the whole bundle has been checked: shape, then
//! hash, then every sealed section opened, then vault writability. Only
//! after all of that succeeds are sections written.

use std::collections::BTreeMap;
use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use zeroize::Zeroizing;

use super::bundle::{ExportBundle, LegacyBundle, LegacyDocument, ParsedBundle, parse_bundle};
use super::integrity::verify_hash;
use super::sealing::SectionSealer;
use super::sections::{Section, SectionStore};
use crate::domain::security::{EncryptedBlob, SecretRecord, SecurityService, derive_key_async};
use crate::error::{Error, Result};

/// What an import changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub applied_sections: Vec<Section>,
    /// Number of credentials written to the vault
    pub secrets_imported: usize,
    /// The file used the whole-file format
    pub legacy_format: bool,
}

/// Applies backup bundles to the live vault and section store
pub struct Importer<'a> {
    security: &'a SecurityService,
    sections: SectionStore,
}

impl<'a> Importer<'a> {
    pub fn new(security: &'a SecurityService) -> Self {
        Self {
            sections: SectionStore::new(security.store()),
            security,
        }
    }

    pub async fn import_file(&self, path: &Path, password: Option<&str>) -> Result<ImportReport> {
        let json = Zeroizing::new(tokio::fs::read_to_string(path).await?);
        self.import_str(&json, password).await
    }

    /// Verify and apply a backup in either format
    ///
    /// # Errors
    ///
    /// - `Error::InvalidBundle` for a malformed file
    /// - `Error::IntegrityMismatch` when the content hash does not match
    /// - `Error::PasswordRequired` when sealed sections need a password
    /// - `Error::WrongKeyOrCorrupted` when a sealed section does not open
    /// - `Error::Locked` when secrets are included and the session is locked
    ///
    /// On any error nothing has been written.
    pub async fn import_str(&self, json: &str, password: Option<&str>) -> Result<ImportReport> {
        let (staged, legacy_format) = match parse_bundle(json)? {
            ParsedBundle::Current(bundle) => (open_current(&bundle, password).await?, false),
            ParsedBundle::Legacy(bundle) => (open_legacy(&bundle, password).await?, true),
        };
        self.apply(staged, legacy_format).await
    }

    async fn apply(
        &self,
        mut staged: BTreeMap<Section, serde_json::Value>,
        legacy_format: bool,
    ) -> Result<ImportReport> {
        let mut secrets_imported = 0;
        let mut applied_sections = Vec::new();

        if let Some(value) = staged.remove(&Section::ApiKeys) {
            let imported = SecretRecord::from_value(value)
                .map_err(|e| Error::InvalidBundle(format!("apiKeys section: {}", e)))?;

            // Fails with Locked before any section is written.
            let mut record = self.security.get_secrets().await?;
            for (name, value) in imported.iter() {
                record.insert(name, value.as_str());
            }
            self.security.save_secrets(&record).await?;

            secrets_imported = imported.len();
            applied_sections.push(Section::ApiKeys);
        }

        for (section, value) in staged {
            self.sections.set(section, &value).await?;
            applied_sections.push(section);
        }
        applied_sections.sort();

        tracing::info!(
            sections = applied_sections.len(),
            key_count = secrets_imported,
            legacy_format,
            "Imported backup"
        );
        Ok(ImportReport {
            applied_sections,
            secrets_imported,
            legacy_format,
        })
    }
}

/// Verify the hash and open every sealed section
async fn open_current(
    bundle: &ExportBundle,
    password: Option<&str>,
) -> Result<BTreeMap<Section, serde_json::Value>> {
    if !verify_hash(bundle) {
        tracing::warn!("Backup hash mismatch; import aborted");
        return Err(Error::IntegrityMismatch);
    }

    let mut staged = bundle.contents.clone();
    if bundle.encrypted_sections.is_empty() {
        return Ok(staged);
    }

    let password = require_password(password, bundle.encrypted_sections.keys())?;
    let salt = bundle
        .salt_bytes()?
        .ok_or_else(|| Error::InvalidBundle("encrypted sections without a salt".to_string()))?;
    let sealer = SectionSealer::derive(password, &salt, bundle.kdf_iterations).await?;

    for (section, payload) in &bundle.encrypted_sections {
        let plaintext = sealer.open(payload)?;
        let value = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::InvalidBundle(format!("section '{}': {}", section, e)))?;
        staged.insert(*section, value);
    }
    Ok(staged)
}

/// Decrypt a whole-file backup if needed and map its sections
async fn open_legacy(
    bundle: &LegacyBundle,
    password: Option<&str>,
) -> Result<BTreeMap<Section, serde_json::Value>> {
    let contents = if bundle.encrypted {
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::PasswordRequired("this backup".to_string()))?;
        let decode = |field: &Option<String>, name: &str| -> Result<Vec<u8>> {
            let encoded = field
                .as_deref()
                .ok_or_else(|| Error::InvalidBundle(format!("missing {}", name)))?;
            STANDARD
                .decode(encoded)
                .map_err(|e| Error::InvalidBundle(format!("invalid {}: {}", name, e)))
        };
        let salt = decode(&bundle.salt, "salt")?;
        let mut raw = decode(&bundle.nonce, "nonce")?;
        raw.extend(decode(&bundle.ciphertext, "ciphertext")?);

        let blob = EncryptedBlob::from_bytes(&raw)
            .map_err(|e| Error::InvalidBundle(e.to_string()))?;
        let key = derive_key_async(password, &salt, bundle.iterations()).await?;
        let plaintext = Zeroizing::new(key.open(&blob)?);
        let document: LegacyDocument = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::InvalidBundle(format!("decrypted document: {}", e)))?;
        document.contents
    } else {
        bundle.contents.clone().unwrap_or_default()
    };

    let mut staged = BTreeMap::new();
    for (name, value) in contents {
        match name.parse::<Section>() {
            Ok(section) => {
                staged.insert(section, value);
            }
            Err(_) => tracing::warn!(section = %name, "Skipping unknown legacy section"),
        }
    }
    Ok(staged)
}

fn require_password<'p, 's>(
    password: Option<&'p str>,
    sections: impl Iterator<Item = &'s Section>,
) -> Result<&'p str> {
    password.filter(|p| !p.is_empty()).ok_or_else(|| {
        let names: Vec<&str> = sections.map(Section::as_str).collect();
        Error::PasswordRequired(names.join(", "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_password_names_sections() {
        let sections = [Section::Notes, Section::ApiKeys];
        match require_password(None, sections.iter()) {
            Err(Error::PasswordRequired(names)) => assert_eq!(names, "notes, apiKeys"),
            other => panic!("expected PasswordRequired, got {:?}", other),
        }
        assert!(require_password(Some(""), sections.iter()).is_err());
        assert_eq!(require_password(Some("pw"), sections.iter()).unwrap(), "pw");
    }

    #[tokio::test]
    async fn test_legacy_plain_bundle_maps_known_sections() {
        let bundle = LegacyBundle {
            version: 1,
            encrypted: false,
            salt: None,
            nonce: None,
            ciphertext: None,
            iterations: None,
            exported_at: None,
            contents: Some(BTreeMap::from([
                ("notes".to_string(), serde_json::json!(["a"])),
                ("weather".to_string(), serde_json::json!({})),
            ])),
        };
        let staged = open_legacy(&bundle, None).await.unwrap();
        assert_eq!(staged.keys().copied().collect::<Vec<_>>(), vec![Section::Notes]);
    }

    #[tokio::test]
    async fn test_sealed_legacy_bundle_needs_password() {
        let bundle = LegacyBundle {
            version: 1,
            encrypted: true,
            salt: Some("AA==".to_string()),
            nonce: Some("AA==".to_string()),
            ciphertext: Some("AA==".to_string()),
            iterations: None,
            exported_at: None,
            contents: None,
        };
        assert!(matches!(
            open_legacy(&bundle, None).await,
            Err(Error::PasswordRequired(_))
        ));
    }
}
