//! Index store — the embedded database behind every workspace.
//!
//! [`IndexStore`] owns the SQLite connection, the per-process sqlite-vec
//! probe state, and the one-shot orphan-vector purge flag. The vector
//! virtual table is never created on open; it is activated lazily once a
//! positive embedding dimension is known (see [`vectors`]).

pub mod chunks;
pub mod files;
pub mod schema;
pub mod vectors;

use crate::config::ChunkingSettings;
use crate::error::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::path::Path;
use std::sync::Once;

pub use chunks::ChunkRow;
pub use files::FileRecord;
pub use vectors::VectorStatus;

static SQLITE_VEC_INIT: Once = Once::new();

/// Meta-table key holding the [`IndexMeta`] JSON blob.
const INDEX_META_KEY: &str = "index_meta";

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Index metadata: the embedding model and chunking parameters the current
/// index contents were produced with. Rewritten on every reindex and on
/// model or dimension change.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    pub model: String,
    pub dims: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vec_extension: Option<String>,
    pub chunking: Option<ChunkingSettings>,
}

/// Main handle to a workspace's index database.
pub struct IndexStore {
    pub(crate) conn: Connection,
    /// Lazily probed sqlite-vec availability: `None` until first use.
    pub(crate) vec_runtime: Cell<Option<bool>>,
    /// One-shot orphan-vector purge, armed once per store lifetime.
    pub(crate) orphans_purged: Cell<bool>,
}

impl IndexStore {
    /// Open (or create) the index database at `path` with pragmas set and
    /// the core schema ensured.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        load_sqlite_vec();
        let conn = Connection::open(path)?;
        // WAL for concurrent readers; wait for writers instead of failing.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Open an in-memory index (for testing). In-memory databases do not
    /// support WAL, so only the busy timeout is set.
    pub fn open_in_memory() -> Result<Self> {
        load_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "busy_timeout", "5000")?;

        schema::ensure_schema(&conn)?;

        Ok(Self {
            conn,
            vec_runtime: Cell::new(None),
            orphans_purged: Cell::new(false),
        })
    }

    /// Read a raw meta value.
    pub fn meta_value(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT value FROM meta WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a raw meta value.
    pub fn set_meta_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            [key, value],
        )?;
        Ok(())
    }

    /// Read the index metadata blob; absent yields the default.
    pub fn read_meta(&self) -> Result<IndexMeta> {
        match self.meta_value(INDEX_META_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(IndexMeta::default()),
        }
    }

    /// Rewrite the index metadata blob.
    pub fn write_meta(&self, meta: &IndexMeta) -> Result<()> {
        self.set_meta_value(INDEX_META_KEY, &serde_json::to_string(meta)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_initializes_schema() {
        let store = IndexStore::open_in_memory().unwrap();
        assert_eq!(store.chunk_count().unwrap(), 0);
        assert!(store.read_meta().unwrap().model.is_empty());
    }

    #[test]
    fn meta_blob_roundtrips() {
        let store = IndexStore::open_in_memory().unwrap();
        let meta = IndexMeta {
            model: "hf:example/model".into(),
            dims: 384,
            vec_extension: Some("v0.1.6".into()),
            chunking: Some(ChunkingSettings::default()),
        };
        store.write_meta(&meta).unwrap();

        let read = store.read_meta().unwrap();
        assert_eq!(read.model, "hf:example/model");
        assert_eq!(read.dims, 384);
        assert_eq!(read.chunking, Some(ChunkingSettings::default()));
    }

    #[test]
    fn open_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/dir/index.db");
        let store = IndexStore::open(&path).unwrap();
        drop(store);
        assert!(path.exists());
    }
}
