//! Tabkeep Core Library
//!
//! This crate provides the core functionality for Tabkeep, including:
//! - Secrets vault (AES-256-GCM under a device key or a password-derived key)
//! - Session lock with an inactivity timeout
//! - Key rotation when protection is enabled, changed or disabled
//! - Per-section backup export and import with an integrity hash
//! - Record storage (SQLite or in-memory)
//! - Configuration

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::backup::{ExportBundle, ExportOptions, Exporter, Importer, Section};
    pub use crate::domain::security::{
        KeyValueStore, SecureString, SecurityService, SecuritySettings,
    };
    pub use crate::error::{Error, Result};
    pub use crate::infrastructure::storage::{InMemoryKeyValueStore, SqliteKeyValueStore};
}
