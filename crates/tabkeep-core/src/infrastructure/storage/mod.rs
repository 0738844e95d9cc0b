//! Key-value record stores
//!
//! - `SqliteKeyValueStore`: the persistent store used by the CLI
//! - `InMemoryKeyValueStore`: for tests and throwaway sessions

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryKeyValueStore;
pub use sqlite::SqliteKeyValueStore;
