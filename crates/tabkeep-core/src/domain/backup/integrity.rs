//! Bundle content hash
//!
//! SHA-256 over a canonical JSON rendering of `contents` and
//! `encryptedSections` with object keys sorted at every level. This detects
//! corruption and casual edits only: the hash sits unauthenticated in the
//! same file.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::bundle::ExportBundle;
use super::sections::Section;
use crate::domain::security::SealedPayload;
use crate::error::Result;

/// Hex digest of the bundle's sections
pub fn compute_hash(
    contents: &BTreeMap<Section, serde_json::Value>,
    encrypted_sections: &BTreeMap<Section, SealedPayload>,
) -> Result<String> {
    let document = serde_json::json!({
        "contents": contents,
        "encryptedSections": encrypted_sections,
    });
    let canonical = serde_json::to_vec(&canonicalize(document))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Recompute and compare against the stored hash
pub fn verify_hash(bundle: &ExportBundle) -> bool {
    match compute_hash(&bundle.contents, &bundle.encrypted_sections) {
        Ok(hash) => hash.eq_ignore_ascii_case(&bundle.hash),
        Err(e) => {
            tracing::warn!(error = %e, "Could not hash backup contents");
            false
        }
    }
}

/// Rebuild objects with keys inserted in sorted order
fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(canonicalize).collect())
        }
        other => other,
    }
}
