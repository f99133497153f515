//! Storage layer abstraction.
//!
//! The substrate store persists dumps, substrate units, proposals,
//! relationships, reflection artifacts, documents, timeline events and the
//! work queue. Two backends are provided:
//!
//! - [`InMemoryStore`]: non-persistent, for tests and embedded use
//! - [`SqliteStore`]: durable, safe to share between worker processes

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    BlockBackend, DocumentBackend, DumpBackend, GraphBackend, PolicyProvider, ProposalBackend,
    QueueBackend, ReflectionBackend, SubstrateStore, TimelineBackend,
};

use crate::Result;
use crate::config::StorageConfig;
use std::sync::Arc;

/// Opens the store described by `config`.
///
/// A configured `sqlite_path` selects [`SqliteStore`]; otherwise an
/// [`InMemoryStore`] is returned.
///
/// # Errors
///
/// Returns an error if the `SQLite` database cannot be opened.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn SubstrateStore>> {
    match &config.sqlite_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Opening SQLite substrate store");
            Ok(Arc::new(SqliteStore::new(path.clone())?))
        },
        None => {
            tracing::info!("Using in-memory substrate store");
            Ok(Arc::new(InMemoryStore::new()))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_store_defaults_to_memory() {
        let store = open_store(&StorageConfig::default()).unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[test]
    fn test_open_store_sqlite() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            sqlite_path: Some(dir.path().join("nested").join("pipeline.db")),
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.backend_name(), "sqlite");
        assert!(dir.path().join("nested").join("pipeline.db").exists());
    }
}
