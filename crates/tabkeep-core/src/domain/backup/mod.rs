//! Backup export and import
//!
//! # Format
//!
//! A bundle is one JSON file. Each selected section is either stored in
//! `contents` or sealed in `encryptedSections` under a key derived from a
//! bundle password and the bundle's own salt. `apiKeys` is always sealed.
//! A SHA-256 `hash` over both maps is checked before anything is imported.
//!
//! The older whole-file format (`version: 1`) is detected and imported too.

pub mod bundle;
pub mod exporter;
pub mod importer;
pub mod integrity;
pub mod sealing;
pub mod sections;

pub use bundle::{
    BUNDLE_VERSION, ExportBundle, LegacyBundle, ParsedBundle, parse_bundle, suggested_filename,
};
pub use exporter::{ExportOptions, Exporter, write_bundle};
pub use importer::{ImportReport, Importer};
pub use integrity::{compute_hash, verify_hash};
pub use sealing::{SectionSealer, open_section, seal_section};
pub use sections::{Section, SectionStore};
