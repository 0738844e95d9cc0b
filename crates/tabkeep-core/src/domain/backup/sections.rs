//! Exportable data sections
//!
//! Non-secret sections are stored as JSON documents in the key-value store
//! under `data:<section>`. The `apiKeys` section lives in the secret vault
//! and is never stored here.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::security::KeyValueStore;
use crate::error::{Error, Result};

/// Record name prefix for section documents
pub const SECTION_RECORD_PREFIX: &str = "data:";

/// A named slice of application data in a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Section {
    Settings,
    Notes,
    Habits,
    Widgets,
    ApiKeys,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Self::Settings,
        Self::Notes,
        Self::Habits,
        Self::Widgets,
        Self::ApiKeys,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::Notes => "notes",
            Self::Habits => "habits",
            Self::Widgets => "widgets",
            Self::ApiKeys => "apiKeys",
        }
    }

    /// Secret sections are always sealed on export
    pub fn is_secret(&self) -> bool {
        matches!(self, Self::ApiKeys)
    }

    pub fn record_key(&self) -> String {
        format!("{}{}", SECTION_RECORD_PREFIX, self.as_str())
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Section {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "settings" => Ok(Self::Settings),
            "notes" => Ok(Self::Notes),
            "habits" => Ok(Self::Habits),
            "widgets" => Ok(Self::Widgets),
            "apiKeys" | "api-keys" | "api_keys" => Ok(Self::ApiKeys),
            _ => Err(Error::InvalidInput(format!(
                "Unknown section '{}'. Expected one of: settings, notes, habits, widgets, apiKeys",
                s
            ))),
        }
    }
}

/// Persists non-secret section documents
#[derive(Clone)]
pub struct SectionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SectionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn check(section: Section) -> Result<()> {
        if section.is_secret() {
            return Err(Error::InvalidInput(format!(
                "Section '{}' is held by the secret vault",
                section
            )));
        }
        Ok(())
    }

    pub async fn get(&self, section: Section) -> Result<Option<serde_json::Value>> {
        Self::check(section)?;
        match self.store.get(&section.record_key()).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, section: Section, value: &serde_json::Value) -> Result<()> {
        Self::check(section)?;
        let json = serde_json::to_string(value)?;
        self.store.set(&section.record_key(), &json).await
    }

    pub async fn remove(&self, section: Section) -> Result<()> {
        Self::check(section)?;
        self.store.remove(&section.record_key()).await
    }

    /// Sections that currently hold a document
    pub async fn stored_sections(&self) -> Result<Vec<Section>> {
        let keys = self.store.keys_with_prefix(SECTION_RECORD_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(SECTION_RECORD_PREFIX))
            .filter_map(|name| name.parse().ok())
            .collect())
    }
}
