//! Backup bundle formats
//!
//! Version 2 seals sections individually and carries a content hash.
//! Version 1 sealed the whole file under one password, or stored it in
//! cleartext; it is still accepted on import.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sections::Section;
use crate::domain::security::{DEFAULT_ITERATIONS, MAX_ITERATIONS, SealedPayload};
use crate::error::{Error, Result};

/// Format version written by this crate
pub const BUNDLE_VERSION: u32 = 2;

/// Whole-file format accepted on import
pub const LEGACY_BUNDLE_VERSION: u32 = 1;

/// Marker embedded in backup filenames
pub const BUNDLE_FORMAT_MARKER: &str = "v2";

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

/// Per-section backup bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: u32,
    pub app_version: String,
    pub exported_at: DateTime<Utc>,
    /// True when any section is sealed
    pub encrypted: bool,
    /// Hex SHA-256 over `contents` and `encryptedSections`
    pub hash: String,
    /// Base64 salt for the bundle password, present iff sections are sealed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    /// PBKDF2 iteration count for the bundle password
    #[serde(default = "default_iterations")]
    pub kdf_iterations: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub encrypted_sections: BTreeMap<Section, SealedPayload>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contents: BTreeMap<Section, serde_json::Value>,
}

impl ExportBundle {
    /// Every section carried, sealed or not
    pub fn sections(&self) -> Vec<Section> {
        let mut sections: Vec<Section> = self
            .contents
            .keys()
            .chain(self.encrypted_sections.keys())
            .copied()
            .collect();
        sections.sort();
        sections
    }

    /// Decoded bundle salt
    pub fn salt_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.salt
            .as_deref()
            .map(|salt| {
                STANDARD
                    .decode(salt)
                    .map_err(|e| Error::InvalidBundle(format!("invalid salt: {}", e)))
            })
            .transpose()
    }

    /// Shape checks applied before any hashing or decryption
    pub fn validate(&self) -> Result<()> {
        if self.version != BUNDLE_VERSION {
            return Err(Error::InvalidBundle(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if self.hash.len() != 64 || !self.hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidBundle("missing or malformed hash".to_string()));
        }
        if let Some(section) = self
            .contents
            .keys()
            .find(|s| self.encrypted_sections.contains_key(s))
        {
            return Err(Error::InvalidBundle(format!(
                "section '{}' is present both encrypted and in cleartext",
                section
            )));
        }
        if let Some(section) = self.contents.keys().find(|s| s.is_secret()) {
            return Err(Error::InvalidBundle(format!(
                "section '{}' must be encrypted",
                section
            )));
        }
        if self.encrypted != !self.encrypted_sections.is_empty() {
            return Err(Error::InvalidBundle(
                "encrypted flag does not match the sealed sections".to_string(),
            ));
        }
        if self.encrypted {
            match self.salt_bytes()? {
                Some(salt) if !salt.is_empty() => {}
                _ => {
                    return Err(Error::InvalidBundle(
                        "encrypted sections without a salt".to_string(),
                    ));
                }
            }
            check_iterations(self.kdf_iterations)?;
        }
        Ok(())
    }
}

/// Whole-file bundle from the previous export format
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyBundle {
    pub version: u32,
    pub encrypted: bool,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub ciphertext: Option<String>,
    #[serde(default)]
    pub iterations: Option<u32>,
    #[serde(default)]
    pub exported_at: Option<String>,
    #[serde(default)]
    pub contents: Option<BTreeMap<String, serde_json::Value>>,
}

/// The document sealed inside an encrypted [`LegacyBundle`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDocument {
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub exported_at: Option<String>,
    pub contents: BTreeMap<String, serde_json::Value>,
}

impl LegacyBundle {
    pub fn validate(&self) -> Result<()> {
        if self.version != LEGACY_BUNDLE_VERSION {
            return Err(Error::InvalidBundle(format!(
                "unsupported legacy version {}",
                self.version
            )));
        }
        if self.encrypted {
            if self.salt.is_none() || self.nonce.is_none() || self.ciphertext.is_none() {
                return Err(Error::InvalidBundle(
                    "encrypted legacy backup is missing salt, nonce or ciphertext".to_string(),
                ));
            }
            check_iterations(self.iterations())?;
        } else if self.contents.is_none() {
            return Err(Error::InvalidBundle("backup has no contents".to_string()));
        }
        Ok(())
    }

    pub fn iterations(&self) -> u32 {
        self.iterations.unwrap_or(DEFAULT_ITERATIONS)
    }
}

/// The iteration count is read from the file and not covered by the hash
fn check_iterations(iterations: u32) -> Result<()> {
    if iterations == 0 || iterations > MAX_ITERATIONS {
        return Err(Error::InvalidBundle(format!(
            "iteration count {} is outside 1..={}",
            iterations, MAX_ITERATIONS
        )));
    }
    Ok(())
}

/// A parsed backup in either format
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBundle {
    Current(ExportBundle),
    Legacy(LegacyBundle),
}

/// Parse and shape-check a backup file
///
/// The format is told apart by the top-level fields: a `hash` or
/// `encryptedSections` means the per-section format, otherwise an
/// `encrypted` flag means the whole-file format.
pub fn parse_bundle(json: &str) -> Result<ParsedBundle> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| Error::InvalidBundle(format!("not valid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| Error::InvalidBundle("expected a JSON object".to_string()))?;
    let is_current = object.contains_key("hash") || object.contains_key("encryptedSections");
    let is_legacy = object.contains_key("encrypted");

    if is_current {
        let bundle: ExportBundle = serde_json::from_value(value)
            .map_err(|e| Error::InvalidBundle(e.to_string()))?;
        bundle.validate()?;
        Ok(ParsedBundle::Current(bundle))
    } else if is_legacy {
        let bundle: LegacyBundle = serde_json::from_value(value)
            .map_err(|e| Error::InvalidBundle(e.to_string()))?;
        bundle.validate()?;
        Ok(ParsedBundle::Legacy(bundle))
    } else {
        Err(Error::InvalidBundle("unrecognized backup format".to_string()))
    }
}

/// Default backup filename for an export made at `at`
pub fn suggested_filename(at: DateTime<Utc>) -> String {
    format!(
        "tabkeep-backup-{}-{}.json",
        BUNDLE_FORMAT_MARKER,
        at.format("%Y%m%dT%H%M%SZ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bundle() -> ExportBundle {
        ExportBundle {
            version: BUNDLE_VERSION,
            app_version: "1.0.0".to_string(),
            exported_at: Utc::now(),
            encrypted: false,
            hash: "0".repeat(64),
            salt: None,
            kdf_iterations: DEFAULT_ITERATIONS,
            encrypted_sections: BTreeMap::new(),
            contents: BTreeMap::from([(Section::Notes, serde_json::json!([]))]),
        }
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(bundle()).unwrap();
        assert!(json.get("appVersion").is_some());
        assert!(json.get("exportedAt").is_some());
        assert!(json["contents"].get("notes").is_some());
        assert!(json.get("encryptedSections").is_none());
        assert!(json.get("salt").is_none());
    }

    #[test]
    fn test_cleartext_secrets_rejected() {
        let mut bundle = bundle();
        bundle
            .contents
            .insert(Section::ApiKeys, serde_json::json!({ "openai": "sk-x" }));
        assert!(matches!(bundle.validate(), Err(Error::InvalidBundle(_))));
    }

    #[test]
    fn test_section_in_both_forms_rejected() {
        let mut bundle = bundle();
        bundle.encrypted = true;
        bundle.salt = Some(STANDARD.encode([1u8; 32]));
        bundle.encrypted_sections.insert(
            Section::Notes,
            SealedPayload {
                ciphertext: STANDARD.encode([0u8; 32]),
                nonce: STANDARD.encode([0u8; 12]),
            },
        );
        assert!(matches!(bundle.validate(), Err(Error::InvalidBundle(_))));
    }

    #[test]
    fn test_encrypted_sections_need_salt() {
        let mut bundle = bundle();
        bundle.contents.clear();
        bundle.encrypted = true;
        bundle.encrypted_sections.insert(
            Section::ApiKeys,
            SealedPayload {
                ciphertext: STANDARD.encode([0u8; 32]),
                nonce: STANDARD.encode([0u8; 12]),
            },
        );
        assert!(matches!(bundle.validate(), Err(Error::InvalidBundle(_))));
    }

    #[test]
    fn test_excessive_iterations_rejected() {
        let mut bundle = bundle();
        bundle.contents.clear();
        bundle.encrypted = true;
        bundle.salt = Some(STANDARD.encode([1u8; 32]));
        bundle.encrypted_sections.insert(
            Section::ApiKeys,
            SealedPayload {
                ciphertext: STANDARD.encode([0u8; 32]),
                nonce: STANDARD.encode([0u8; 12]),
            },
        );
        assert!(bundle.validate().is_ok());

        bundle.kdf_iterations = u32::MAX;
        assert!(matches!(bundle.validate(), Err(Error::InvalidBundle(_))));
        bundle.kdf_iterations = 0;
        assert!(matches!(bundle.validate(), Err(Error::InvalidBundle(_))));

        let legacy = format!(
            r#"{{"version":1,"encrypted":true,"salt":"AA==","nonce":"AA==","ciphertext":"AA==","iterations":{}}}"#,
            u32::MAX
        );
        assert!(matches!(parse_bundle(&legacy), Err(Error::InvalidBundle(_))));
    }

    #[test]
    fn test_parse_detects_formats() {
        let current = serde_json::to_string(&bundle()).unwrap();
        assert!(matches!(
            parse_bundle(&current).unwrap(),
            ParsedBundle::Current(_)
        ));

        let legacy = r#"{"version":1,"encrypted":false,"contents":{"notes":[]}}"#;
        assert!(matches!(
            parse_bundle(legacy).unwrap(),
            ParsedBundle::Legacy(_)
        ));

        let sealed_legacy =
            r#"{"version":1,"encrypted":true,"salt":"AA==","nonce":"AA==","ciphertext":"AA=="}"#;
        assert!(matches!(
            parse_bundle(sealed_legacy).unwrap(),
            ParsedBundle::Legacy(LegacyBundle {
                encrypted: true,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_files() {
        assert!(matches!(parse_bundle("not json"), Err(Error::InvalidBundle(_))));
        assert!(matches!(parse_bundle("[1,2]"), Err(Error::InvalidBundle(_))));
        assert!(matches!(
            parse_bundle(r#"{"version":2}"#),
            Err(Error::InvalidBundle(_))
        ));
        assert!(matches!(
            parse_bundle(r#"{"version":1,"encrypted":true}"#),
            Err(Error::InvalidBundle(_))
        ));
    }

    #[test]
    fn test_suggested_filename() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            suggested_filename(at),
            "tabkeep-backup-v2-20260304T050607Z.json"
        );
    }
}
