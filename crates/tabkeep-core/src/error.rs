//! Error types for Tabkeep

use thiserror::Error;

use crate::domain::security::KeyError;

/// Result type alias using Tabkeep's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Tabkeep error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Session / vault errors (E100-E199)
    #[error("Session is locked. Unlock with your password to access API keys.")]
    Locked,

    #[error("Incorrect password or corrupted data.")]
    WrongKeyOrCorrupted,

    #[error("Password protection is not enabled.")]
    ProtectionNotEnabled,

    #[error("Password protection is already enabled. Use `tabkeep protect change` to change the password.")]
    ProtectionAlreadyEnabled,

    #[error("Encryption error: {0}")]
    Crypto(String),

    // Backup errors (E200-E299)
    #[error("Backup integrity check failed: the file is corrupted or was modified after export.")]
    IntegrityMismatch,

    #[error("Invalid backup file: {0}")]
    InvalidBundle(String),

    #[error("A password is required for {0}.")]
    PasswordRequired(String),

    // Storage errors (E400-E499)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    Config(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Locked => "E100",
            Self::WrongKeyOrCorrupted => "E101",
            Self::ProtectionNotEnabled => "E102",
            Self::ProtectionAlreadyEnabled => "E103",
            Self::Crypto(_) => "E104",
            Self::IntegrityMismatch => "E200",
            Self::InvalidBundle(_) => "E201",
            Self::PasswordRequired(_) => "E202",
            Self::Database(_) => "E400",
            Self::Storage(_) => "E401",
            Self::Config(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Serialization(_) => "E801",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Locked => Some("tabkeep unlock".to_string()),
            Self::ProtectionNotEnabled => Some("tabkeep protect enable".to_string()),
            Self::ProtectionAlreadyEnabled => Some("tabkeep protect change".to_string()),
            Self::PasswordRequired(_) => {
                Some("set TABKEEP_EXPORT_PASSWORD or run from a terminal to be prompted".to_string())
            }
            Self::Config(_) => Some("tabkeep config list".to_string()),
            _ => None,
        }
    }

    /// True for failures the caller can fix by unlocking the session
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked)
    }
}

impl From<KeyError> for Error {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::DecryptionFailed(_) => Self::WrongKeyOrCorrupted,
            KeyError::EncryptionFailed(msg) => Self::Crypto(msg),
            KeyError::InvalidKeyLength { expected, actual } => Self::Crypto(format!(
                "invalid key length: expected {}, got {}",
                expected, actual
            )),
            KeyError::InvalidFormat(msg) => Self::Crypto(msg),
            KeyError::InvalidKdfInput(msg) => Self::InvalidInput(msg),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
