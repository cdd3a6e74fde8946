//! Durable entity store.
//!
//! Every collection (images, batches, queue items, faces, persons) and every
//! setting is a single JSON value under a fixed key in one SQLite table. A
//! mutation is a read-modify-write of whole collections; operations touching
//! more than one collection commit in a single transaction, so a failed write
//! never leaves half an update behind.

mod batches;
mod faces;
mod images;
pub mod models;
mod queue;
mod quota;
mod schema;
mod settings;

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

pub use models::{
    BoundingBox, Batch, FaceData, FacePatch, Image, ImagePatch, NewFace, Person, QueueItem,
    QueueStatus,
};
pub use quota::StorageUsage;
pub use settings::DEFAULT_LOCAL_URL;

use schema::SCHEMA;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("image {0} has no analysis result")]
    MissingResult(String),

    #[error("storage quota exceeded: write needs {required} bytes, budget is {budget} bytes")]
    QuotaExceeded { required: u64, budget: u64 },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to encode record: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One pending write: `Some` replaces the value, `None` deletes the key.
pub(crate) type Entry = (&'static str, Option<String>);

pub struct Store {
    conn: Connection,
    budget_bytes: u64,
}

impl Store {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path, budget_bytes: u64) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn, budget_bytes };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory(budget_bytes: u64) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, budget_bytes };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    pub(crate) fn read_value(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Load a collection. A missing key is an empty collection; an undecodable
    /// one is logged and treated as empty.
    pub(crate) fn load<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Vec<T>> {
        let Some(raw) = self.read_value(key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(items) => Ok(items),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecodable collection");
                Ok(Vec::new())
            }
        }
    }

    pub(crate) fn encode<T: Serialize>(items: &[T]) -> StoreResult<String> {
        Ok(serde_json::to_string(items)?)
    }

    pub(crate) fn save<T: Serialize>(&self, key: &'static str, items: &[T]) -> StoreResult<()> {
        self.commit(vec![(key, Some(Self::encode(items)?))])
    }

    /// Apply writes atomically. Writes that would grow usage past the budget
    /// are rejected and nothing is changed.
    pub(crate) fn commit(&self, entries: Vec<Entry>) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        let used = Self::bytes_used_in(&tx)?;
        let mut projected = used;
        for (key, value) in &entries {
            let old: Option<i64> = tx
                .query_row(
                    "SELECT LENGTH(CAST(value AS BLOB)) FROM kv WHERE key = ?",
                    [key],
                    |row| row.get(0),
                )
                .optional()?;
            projected -= old.unwrap_or(0) as u64;
            projected += value.as_ref().map(|v| v.len() as u64).unwrap_or(0);
        }

        if projected > used && projected > self.budget_bytes {
            return Err(StoreError::QuotaExceeded {
                required: projected,
                budget: self.budget_bytes,
            });
        }

        for (key, value) in &entries {
            match value {
                Some(value) => {
                    tx.execute(
                        "INSERT INTO kv (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        rusqlite::params![key, value],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM kv WHERE key = ?", [key])?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn bytes_used_in(conn: &Connection) -> StoreResult<u64> {
        let used: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) FROM kv",
            [],
            |row| row.get(0),
        )?;
        Ok(used as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_collection_is_empty() {
        let store = Store::open_in_memory(1024).unwrap();
        let items: Vec<String> = store.load("nothing").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_corrupt_collection_reads_as_empty() {
        let store = Store::open_in_memory(1024).unwrap();
        store
            .commit(vec![("metalens_images", Some("{not json".to_string()))])
            .unwrap();
        let items: Vec<Image> = store.load("metalens_images").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_quota_rejects_growth_and_keeps_previous_value() {
        let store = Store::open_in_memory(16).unwrap();
        store.commit(vec![("k", Some("short".to_string()))]).unwrap();

        let err = store
            .commit(vec![("k", Some("x".repeat(64)))])
            .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { budget: 16, .. }));
        assert_eq!(store.read_value("k").unwrap().as_deref(), Some("short"));
    }

    #[test]
    fn test_shrinking_write_allowed_over_budget() {
        let store = Store::open_in_memory(1024).unwrap();
        store.commit(vec![("k", Some("x".repeat(100)))]).unwrap();

        let tight = Store {
            conn: store.conn,
            budget_bytes: 10,
        };
        tight.commit(vec![("k", Some("x".repeat(50)))]).unwrap();
        tight.commit(vec![("k", None)]).unwrap();
        assert!(tight.read_value("k").unwrap().is_none());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("metalens.db");
        {
            let store = Store::open(&path, 1024).unwrap();
            store.save("list", &["a".to_string(), "b".to_string()]).unwrap();
        }
        let store = Store::open(&path, 1024).unwrap();
        let items: Vec<String> = store.load("list").unwrap();
        assert_eq!(items, vec!["a", "b"]);
    }
}
