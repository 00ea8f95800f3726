//! Content store adapter modules.

pub mod memory_adapter;
pub mod sqlite_adapter;

use crate::config::{StoreBackend, StoreConfig};
use crate::{BenchResult, ContentStore};

/// Open the backend named by `config`.
pub fn open_store(config: &StoreConfig) -> BenchResult<Box<dyn ContentStore>> {
    let store: Box<dyn ContentStore> = match config.backend {
        StoreBackend::Sqlite => Box::new(sqlite_adapter::SqliteStore::open(
            &config.path,
            &config.table_prefix,
        )?),
        StoreBackend::Memory => Box::new(memory_adapter::MemoryStore::new()),
    };
    Ok(store)
}
