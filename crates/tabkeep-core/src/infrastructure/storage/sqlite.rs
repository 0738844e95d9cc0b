//! SQLite-backed record store
//!
//! One table of string records. Values are written as given; anything
//! sensitive has already been sealed by the domain layer.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::domain::security::KeyValueStore;
use crate::error::{Error, Result};

/// Database file name inside the data directory
pub const DATABASE_FILE: &str = "tabkeep.db";

/// SQL to create the kv_records table
pub const CREATE_KV_RECORDS_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS kv_records (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Default maximum connections in the pool
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite-backed implementation of [`KeyValueStore`]
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Wrap an existing pool; call [`Self::initialize`] before use
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and its schema
    ///
    /// On unix the file is restricted to the owner.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!(
                    "Failed to create data directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(connect_options)
            .await?;

        set_file_permissions(path)?;

        let store = Self::new(pool);
        store.initialize().await?;
        tracing::debug!(path = %path.display(), "Opened record store");
        Ok(store)
    }

    /// In-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self> {
        // In-memory requires single connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    /// Create the kv_records table if it doesn't exist
    pub async fn initialize(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_KV_RECORDS_TABLE_SQL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_records (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_records WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT key FROM kv_records WHERE substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("key")).collect())
    }
}

fn set_file_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_get_overwrite_remove() {
        let store = SqliteKeyValueStore::in_memory().await.unwrap();

        assert!(store.get("security-config").await.unwrap().is_none());

        store.set("security-config", "{\"enabled\":false}").await.unwrap();
        store.set("security-config", "{\"enabled\":true}").await.unwrap();
        assert_eq!(
            store.get("security-config").await.unwrap().as_deref(),
            Some("{\"enabled\":true}")
        );

        store.remove("security-config").await.unwrap();
        store.remove("security-config").await.unwrap();
        assert!(!store.contains("security-config").await.unwrap());
    }

    #[tokio::test]
    async fn test_prefix_is_literal() {
        let store = SqliteKeyValueStore::in_memory().await.unwrap();
        store.set("data:notes", "[]").await.unwrap();
        store.set("data:habits", "[]").await.unwrap();
        store.set("dataXnotes", "[]").await.unwrap();
        store.set("data%", "[]").await.unwrap();

        assert_eq!(
            store.keys_with_prefix("data:").await.unwrap(),
            vec!["data:habits".to_string(), "data:notes".to_string()]
        );
        assert_eq!(
            store.keys_with_prefix("data%").await.unwrap(),
            vec!["data%".to_string()]
        );
    }

    #[tokio::test]
    async fn test_file_store_persists_across_connections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(DATABASE_FILE);

        {
            let store = SqliteKeyValueStore::connect(&path).await.unwrap();
            store.set("device-key", "abc").await.unwrap();
            store.pool().close().await;
        }

        let store = SqliteKeyValueStore::connect(&path).await.unwrap();
        assert_eq!(store.get("device-key").await.unwrap().as_deref(), Some("abc"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_database_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DATABASE_FILE);
        let _store = SqliteKeyValueStore::connect(&path).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
