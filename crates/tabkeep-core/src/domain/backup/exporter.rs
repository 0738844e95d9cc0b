//! Backup export
//!
//! Collects the selected sections, seals the ones that must or should be
//! encrypted under a per-bundle password, and stamps the content hash last.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use zeroize::Zeroizing;

use super::bundle::{BUNDLE_VERSION, ExportBundle};
use super::integrity::compute_hash;
use super::sealing::SectionSealer;
use super::sections::{Section, SectionStore};
use crate::domain::security::{SecureString, SecurityService, generate_salt};
use crate::error::{Error, Result};

/// What to export and how
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub sections: BTreeSet<Section>,
    /// Non-secret sections to seal as well; secret sections are always sealed
    pub encrypt_sections: BTreeSet<Section>,
    pub password: Option<SecureString>,
    pub app_version: String,
}

impl ExportOptions {
    pub fn new(sections: impl IntoIterator<Item = Section>) -> Self {
        Self {
            sections: sections.into_iter().collect(),
            encrypt_sections: BTreeSet::new(),
            password: None,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecureString::new(password.into()));
        self
    }

    pub fn encrypt(mut self, sections: impl IntoIterator<Item = Section>) -> Self {
        self.encrypt_sections.extend(sections);
        self
    }

    /// Selected sections that will be sealed
    pub fn sealed_sections(&self) -> BTreeSet<Section> {
        self.sections
            .iter()
            .filter(|s| s.is_secret() || self.encrypt_sections.contains(s))
            .copied()
            .collect()
    }

    /// Reject option sets that cannot produce a safe bundle
    ///
    /// Runs before anything is read from storage.
    pub fn validate(&self) -> Result<()> {
        if self.sections.is_empty() {
            return Err(Error::InvalidInput("No sections selected for export".to_string()));
        }

        let sealed = self.sealed_sections();
        let has_password = self
            .password
            .as_ref()
            .is_some_and(|p| !p.as_str().is_empty());
        if !sealed.is_empty() && !has_password {
            let names: Vec<&str> = sealed.iter().map(Section::as_str).collect();
            return Err(Error::PasswordRequired(names.join(", ")));
        }
        Ok(())
    }
}

/// Builds [`ExportBundle`]s from the live vault and section store
pub struct Exporter<'a> {
    security: &'a SecurityService,
    sections: SectionStore,
}

impl<'a> Exporter<'a> {
    pub fn new(security: &'a SecurityService) -> Self {
        Self {
            sections: SectionStore::new(security.store()),
            security,
        }
    }

    /// Assemble a bundle
    ///
    /// # Errors
    ///
    /// `Error::PasswordRequired` before any I/O when a sealed section has no
    /// password; `Error::Locked` when secrets are requested while the
    /// session is locked.
    pub async fn export(&self, options: &ExportOptions) -> Result<ExportBundle> {
        options.validate()?;
        let sealed = options.sealed_sections();

        let mut plain: BTreeMap<Section, serde_json::Value> = BTreeMap::new();
        for section in &options.sections {
            let value = if section.is_secret() {
                Some(self.security.get_secrets().await?.to_value())
            } else {
                self.sections.get(*section).await?
            };
            match value {
                Some(value) => {
                    plain.insert(*section, value);
                }
                None => tracing::debug!(section = %section, "Section empty; skipped"),
            }
        }

        let mut contents = BTreeMap::new();
        let mut encrypted_sections = BTreeMap::new();
        let mut salt = None;
        let iterations = self.security.settings().kdf_iterations;

        if plain.keys().any(|s| sealed.contains(s)) {
            let password = options
                .password
                .as_ref()
                .ok_or_else(|| Error::PasswordRequired("encrypted sections".to_string()))?;
            let salt_bytes = generate_salt();
            let sealer = SectionSealer::derive(password.as_str(), &salt_bytes, iterations).await?;
            salt = Some(STANDARD.encode(&salt_bytes));

            for (section, value) in plain {
                if sealed.contains(&section) {
                    let json = Zeroizing::new(serde_json::to_vec(&value)?);
                    encrypted_sections.insert(section, sealer.seal(&json)?);
                } else {
                    contents.insert(section, value);
                }
            }
        } else {
            contents = plain;
        }

        let hash = compute_hash(&contents, &encrypted_sections)?;
        let bundle = ExportBundle {
            version: BUNDLE_VERSION,
            app_version: options.app_version.clone(),
            exported_at: Utc::now(),
            encrypted: !encrypted_sections.is_empty(),
            hash,
            salt,
            kdf_iterations: iterations,
            encrypted_sections,
            contents,
        };

        tracing::info!(
            sections = bundle.sections().len(),
            encrypted = bundle.encrypted,
            "Built backup bundle"
        );
        Ok(bundle)
    }

    /// Export straight to a file
    pub async fn export_to_file(&self, options: &ExportOptions, path: &Path) -> Result<ExportBundle> {
        let bundle = self.export(options).await?;
        write_bundle(&bundle, path).await?;
        Ok(bundle)
    }
}

/// Write a bundle as pretty JSON via a temporary file and rename
pub async fn write_bundle(bundle: &ExportBundle, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(bundle)?;
    let tmp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;

    tracing::info!(path = %path.display(), "Wrote backup");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_keys_always_sealed() {
        let options = ExportOptions::new([Section::Notes, Section::ApiKeys]);
        let sealed = options.sealed_sections();
        assert_eq!(sealed.into_iter().collect::<Vec<_>>(), vec![Section::ApiKeys]);
    }

    #[test]
    fn test_secrets_without_password_rejected() {
        let options = ExportOptions::new([Section::ApiKeys]);
        match options.validate() {
            Err(Error::PasswordRequired(names)) => assert_eq!(names, "apiKeys"),
            other => panic!("expected PasswordRequired, got {:?}", other),
        }

        let options = ExportOptions::new([Section::ApiKeys]).with_password("");
        assert!(matches!(options.validate(), Err(Error::PasswordRequired(_))));
    }

    #[test]
    fn test_requested_encryption_needs_password() {
        let options = ExportOptions::new([Section::Notes]).encrypt([Section::Notes]);
        assert!(matches!(options.validate(), Err(Error::PasswordRequired(_))));
    }

    #[test]
    fn test_encrypting_unselected_section_is_ignored() {
        let options = ExportOptions::new([Section::Notes]).encrypt([Section::Habits]);
        assert!(options.sealed_sections().is_empty());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_empty_selection_rejected() {
        let options = ExportOptions::new([]);
        assert!(matches!(options.validate(), Err(Error::InvalidInput(_))));
    }
}
