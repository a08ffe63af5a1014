//! In-memory document store, used by tests and throwaway runs.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use plughost_core::error::Result;
use plughost_core::traits::{Document, Store, StoreHealth, StoreStats, UpdateResult};

use crate::document::{apply_update, matches, upsert_document};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| matches(d, filter)).cloned().collect())
            .unwrap_or_default())
    }

    async fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| matches(d, filter)).cloned()))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();

        if let Some(doc) = docs.iter_mut().find(|d| matches(d, filter)) {
            // Apply to a copy so a rejected update leaves the document intact.
            let mut next = doc.clone();
            let modified = apply_update(&mut next, update)?;
            *doc = next;
            return Ok(UpdateResult {
                matched: 1,
                modified: modified as u64,
                upserted: false,
            });
        }
        if !upsert {
            return Ok(UpdateResult::default());
        }
        docs.push(upsert_document(filter, update)?);
        Ok(UpdateResult {
            matched: 0,
            modified: 0,
            upserted: true,
        })
    }

    async fn delete_one(&self, collection: &str, filter: &Document) -> Result<bool> {
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs.iter().position(|d| matches(d, filter)) {
            Some(i) => {
                docs.remove(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<StoreHealth> {
        let started = Instant::now();
        let collections = self.collections.read();
        let documents: usize = collections.values().map(Vec::len).sum();
        let bytes: usize = collections
            .values()
            .flatten()
            .map(|d| serde_json::to_string(d).map(|s| s.len()).unwrap_or(0))
            .sum();
        Ok(StoreHealth {
            healthy: true,
            ping_ms: started.elapsed().as_millis() as u64,
            stats: StoreStats {
                collections: collections.values().filter(|d| !d.is_empty()).count() as u64,
                documents: documents as u64,
                data_size_mb: bytes as f64 / (1024.0 * 1024.0),
            },
        })
    }
}
