//! SQL DDL for the index database.
//!
//! Defines the `meta`, `files`, `chunks`, and `embedding_cache` tables. All
//! DDL uses `IF NOT EXISTS` for idempotent initialization. The `vec_chunks`
//! virtual table is *not* part of this DDL — it is created lazily once the
//! embedding dimension is known (see [`crate::db::vectors`]).

use crate::error::Result;
use rusqlite::Connection;

/// Core schema. `chunks.embedding` is a JSON array of f32 (possibly `[]`);
/// the fixed-width copy for similarity search lives in `vec_chunks`.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    hash TEXT NOT NULL,
    mtime INTEGER NOT NULL,
    size INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    hash TEXT NOT NULL,
    model TEXT NOT NULL,
    content TEXT NOT NULL,
    embedding TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);

CREATE TABLE IF NOT EXISTS embedding_cache (
    model TEXT NOT NULL,
    hash TEXT NOT NULL,
    embedding TEXT NOT NULL,
    dims INTEGER,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (model, hash)
);

CREATE INDEX IF NOT EXISTS idx_embedding_cache_updated_at ON embedding_cache(updated_at);
"#;

/// Columns the current binary requires on `chunks`. An existing table
/// missing any of these is from an incompatible build and is rebuilt.
const REQUIRED_CHUNK_COLUMNS: &[&str] = &[
    "id",
    "path",
    "line_start",
    "line_end",
    "hash",
    "model",
    "content",
    "embedding",
    "updated_at",
];

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn chunk_table_is_compatible(conn: &Connection) -> Result<bool> {
    let mut stmt = conn.prepare("PRAGMA table_info(chunks)")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(REQUIRED_CHUNK_COLUMNS
        .iter()
        .all(|required| columns.iter().any(|c| c == required)))
}

/// Initialize all core tables, rebuilding `chunks` if an older build left an
/// incompatible shape behind.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    if table_exists(conn, "chunks")? && !chunk_table_is_compatible(conn)? {
        tracing::warn!("chunks table has incompatible columns, rebuilding");
        conn.execute("DROP TABLE chunks", [])?;
    }
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
