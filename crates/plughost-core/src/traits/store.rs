//! Store trait: collection-scoped JSON documents, MongoDB style.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A stored document: a JSON object.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Result of [`Store::update_one`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
    pub upserted: bool,
}

/// Result of [`Store::health_check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHealth {
    pub healthy: bool,
    pub ping_ms: u64,
    pub stats: StoreStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub collections: u64,
    pub documents: u64,
    pub data_size_mb: f64,
}

/// Document store used by plugins.
///
/// Filters match on top-level field equality. Updates take the
/// `{"$set": {...}, "$inc": {...}}` shape; a bare object is treated as `$set`.
#[async_trait]
pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    async fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>>;

    async fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>>;

    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> Result<UpdateResult>;

    /// Returns whether a document was deleted.
    async fn delete_one(&self, collection: &str, filter: &Document) -> Result<bool>;

    async fn health_check(&self) -> Result<StoreHealth>;
}
