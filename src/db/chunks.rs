//! Chunk rows: the logical fragments search operates on.

use super::IndexStore;
use crate::error::Result;
use rusqlite::params;

/// One chunk row as stored. `embedding` is a JSON array of f32 (possibly
/// `[]` when indexed without a provider; `model` is then the empty string).
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub id: String,
    pub path: String,
    pub line_start: usize,
    pub line_end: usize,
    pub hash: String,
    pub model: String,
    pub content: String,
    pub embedding: String,
    pub updated_at: i64,
}

impl IndexStore {
    pub fn insert_chunk(&self, row: &ChunkRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO chunks (id, path, line_start, line_end, hash, model, content, embedding, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.id,
                row.path,
                row.line_start as i64,
                row.line_end as i64,
                row.hash,
                row.model,
                row.content,
                row.embedding,
                row.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete_chunks_for_path(&self, path: &str) -> Result<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM chunks WHERE path = ?1", [path])?;
        Ok(rows)
    }

    pub fn delete_all_chunks(&self) -> Result<()> {
        self.conn.execute("DELETE FROM chunks", [])?;
        Ok(())
    }

    pub fn chunk_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn chunk_count_for_path(&self, path: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE path = ?1",
            [path],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// All chunk rows for a file, in insertion (chunker) order.
    pub fn chunks_for_path(&self, path: &str) -> Result<Vec<ChunkRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, path, line_start, line_end, hash, model, content, embedding, updated_at
             FROM chunks WHERE path = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([path], |row| {
                Ok(ChunkRow {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    line_start: row.get::<_, i64>(2)? as usize,
                    line_end: row.get::<_, i64>(3)? as usize,
                    hash: row.get(4)?,
                    model: row.get(5)?,
                    content: row.get(6)?,
                    embedding: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Distinct chunk hashes currently indexed (cache accounting).
    pub fn distinct_chunk_hashes(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(DISTINCT hash) FROM chunks", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}
