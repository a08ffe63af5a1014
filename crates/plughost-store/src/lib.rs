//! # PlugHost Store
//! Document store backends implementing [`plughost_core::traits::Store`].

pub mod document;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use plughost_core::config::StoreConfig;
use plughost_core::error::{PlugHostError, Result};
use plughost_core::traits::Store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Create a store from configuration.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteStore::open(&config.expanded_path())?)),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(PlugHostError::Config(format!("Unknown store backend: {other}"))),
    }
}
