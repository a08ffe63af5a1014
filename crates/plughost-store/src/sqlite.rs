//! SQLite document store. JSON bodies grouped by collection.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use plughost_core::error::{PlugHostError, Result};
use plughost_core::traits::{Document, Store, StoreHealth, StoreStats, UpdateResult};
use rusqlite::{Connection, params};

use crate::document::{apply_update, matches, upsert_document};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> PlugHostError {
    PlugHostError::StoreUnavailable(e.to_string())
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self::with_connection(conn)?;
        tracing::info!("🗄️ SQLite store opened at {}", path.display());
        Ok(store)
    }

    /// A throwaway database that lives as long as the store.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Every document of a collection with its row id, oldest first.
    fn scan(conn: &Connection, collection: &str) -> Result<Vec<(i64, Document)>> {
        let mut stmt = conn
            .prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;

        let mut docs = Vec::new();
        for row in rows {
            let (id, body) = row.map_err(db_err)?;
            match serde_json::from_str::<Document>(&body) {
                Ok(doc) => docs.push((id, doc)),
                Err(e) => tracing::warn!("⚠️ Skipping corrupt document {collection}#{id}: {e}"),
            }
        }
        Ok(docs)
    }

    fn first_match(conn: &Connection, collection: &str, filter: &Document) -> Result<Option<(i64, Document)>> {
        Ok(Self::scan(conn, collection)?
            .into_iter()
            .find(|(_, doc)| matches(doc, filter)))
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        Ok(Self::scan(&conn, collection)?
            .into_iter()
            .filter(|(_, doc)| matches(doc, filter))
            .map(|(_, doc)| doc)
            .collect())
    }

    async fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        Ok(Self::first_match(&conn, collection, filter)?.map(|(_, doc)| doc))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> Result<UpdateResult> {
        let conn = self.conn.lock();
        match Self::first_match(&conn, collection, filter)? {
            Some((id, mut doc)) => {
                let modified = apply_update(&mut doc, update)?;
                if modified {
                    conn.execute(
                        "UPDATE documents SET body = ?1, updated_at = ?2 WHERE id = ?3",
                        params![serde_json::to_string(&doc)?, Self::now(), id],
                    )
                    .map_err(db_err)?;
                }
                Ok(UpdateResult {
                    matched: 1,
                    modified: modified as u64,
                    upserted: false,
                })
            }
            None if upsert => {
                let doc = upsert_document(filter, update)?;
                conn.execute(
                    "INSERT INTO documents (collection, body, updated_at) VALUES (?1, ?2, ?3)",
                    params![collection, serde_json::to_string(&doc)?, Self::now()],
                )
                .map_err(db_err)?;
                Ok(UpdateResult {
                    matched: 0,
                    modified: 0,
                    upserted: true,
                })
            }
            None => Ok(UpdateResult::default()),
        }
    }

    async fn delete_one(&self, collection: &str, filter: &Document) -> Result<bool> {
        let conn = self.conn.lock();
        let Some((id, _)) = Self::first_match(&conn, collection, filter)? else {
            return Ok(false);
        };
        conn.execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(true)
    }

    async fn health_check(&self) -> Result<StoreHealth> {
        let conn = self.conn.lock();
        let started = Instant::now();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(db_err)?;
        let ping_ms = started.elapsed().as_millis() as u64;

        let (collections, documents): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(DISTINCT collection), COUNT(*) FROM documents",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db_err)?;
        let page_count: i64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .map_err(db_err)?;
        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .map_err(db_err)?;

        Ok(StoreHealth {
            healthy: true,
            ping_ms,
            stats: StoreStats {
                collections: collections as u64,
                documents: documents as u64,
                data_size_mb: (page_count * page_size) as f64 / (1024.0 * 1024.0),
            },
        })
    }
}
