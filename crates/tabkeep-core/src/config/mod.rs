//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::security::{
    DEFAULT_ITERATIONS, DEFAULT_SESSION_TIMEOUT_MINUTES, MAX_ITERATIONS, SecuritySettings,
};
use crate::infrastructure::storage::sqlite::DATABASE_FILE;

/// Lowest PBKDF2 iteration count accepted in configuration
pub const MIN_KDF_ITERATIONS: u32 = DEFAULT_ITERATIONS;

/// Highest PBKDF2 iteration count accepted in configuration
pub const MAX_KDF_ITERATIONS: u32 = MAX_ITERATIONS;

/// Longest session timeout accepted in configuration (one day)
pub const MAX_SESSION_TIMEOUT_MINUTES: u64 = 1440;

/// Tabkeep configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub security: SecurityConfigSection,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `tabkeep.db`; platform data dir when unset
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfigSection {
    pub kdf_iterations: u32,
    pub session_timeout_minutes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Where backups are written when no path is given
    pub default_dir: Option<PathBuf>,
}

impl Default for SecurityConfigSection {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_ITERATIONS,
            session_timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
        }
    }
}

const KEYS: [&str; 4] = [
    "storage.data_dir",
    "security.kdf_iterations",
    "security.session_timeout_minutes",
    "export.default_dir",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("TABKEEP_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("tabkeep")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            // Return default config without creating file
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(MIN_KDF_ITERATIONS..=MAX_KDF_ITERATIONS).contains(&self.security.kdf_iterations) {
            return Err(anyhow!(
                "security.kdf_iterations must be between {} and {}",
                MIN_KDF_ITERATIONS,
                MAX_KDF_ITERATIONS
            ));
        }
        if !(1..=MAX_SESSION_TIMEOUT_MINUTES).contains(&self.security.session_timeout_minutes) {
            return Err(anyhow!(
                "security.session_timeout_minutes must be between 1 and {}",
                MAX_SESSION_TIMEOUT_MINUTES
            ));
        }
        Ok(())
    }

    /// Directory holding the record database
    ///
    /// `TABKEEP_DATA_DIR` wins over `storage.data_dir`.
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        if let Ok(custom_dir) = env::var("TABKEEP_DATA_DIR") {
            return Ok(PathBuf::from(custom_dir));
        }
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::data_dir()
                .ok_or_else(|| anyhow!("Could not determine data directory"))?
                .join("tabkeep")),
        }
    }

    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        Ok(self.data_dir()?.join(DATABASE_FILE))
    }

    /// Directory for backups written without an explicit path
    pub fn export_dir(&self) -> PathBuf {
        self.export
            .default_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Parameters handed to the security service
    pub fn security_settings(&self) -> SecuritySettings {
        SecuritySettings {
            kdf_iterations: self.security.kdf_iterations,
            session_timeout_minutes: self.security.session_timeout_minutes,
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let unset = || "(not set)".to_string();
        match key {
            "storage.data_dir" => Ok(self
                .storage
                .data_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(unset)),
            "security.kdf_iterations" => Ok(self.security.kdf_iterations.to_string()),
            "security.session_timeout_minutes" => {
                Ok(self.security.session_timeout_minutes.to_string())
            }
            "export.default_dir" => Ok(self
                .export
                .default_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(unset)),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `tabkeep config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    ///
    /// An empty value clears optional paths.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = |value: &str| (!value.is_empty()).then(|| PathBuf::from(value));
        match key {
            "storage.data_dir" => {
                self.storage.data_dir = path(value);
            }
            "security.kdf_iterations" => {
                let iterations: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid kdf_iterations value: {}", value))?;
                if !(MIN_KDF_ITERATIONS..=MAX_KDF_ITERATIONS).contains(&iterations) {
                    return Err(anyhow!(
                        "KDF iterations must be between {} and {}",
                        MIN_KDF_ITERATIONS,
                        MAX_KDF_ITERATIONS
                    ));
                }
                self.security.kdf_iterations = iterations;
            }
            "security.session_timeout_minutes" => {
                let minutes: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid session_timeout_minutes value: {}", value))?;
                if !(1..=MAX_SESSION_TIMEOUT_MINUTES).contains(&minutes) {
                    return Err(anyhow!(
                        "Session timeout must be between 1 and {} minutes",
                        MAX_SESSION_TIMEOUT_MINUTES
                    ));
                }
                self.security.session_timeout_minutes = minutes;
            }
            "export.default_dir" => {
                self.export.default_dir = path(value);
            }
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `tabkeep config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
