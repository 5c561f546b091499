//! Vector table lifecycle and the embedding cache.
//!
//! The similarity side of the index is a sqlite-vec `vec0` virtual table,
//! `vec_chunks(id TEXT PRIMARY KEY, embedding FLOAT[dims])`, created lazily
//! once the embedding dimension is known and recreated whenever the model
//! or dimension changes. The `embedding_cache` table is content-addressed
//! by `(model, chunk_hash)` and is only ever invalidated by deleting the
//! database file.

use super::IndexStore;
use crate::error::Result;
use rusqlite::params;
use std::collections::HashMap;

/// Outcome of [`IndexStore::ensure_vector_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorStatus {
    /// The vector table exists with the requested model and dimension.
    Ready,
    /// Similarity search must fall back to in-process scoring.
    NotReady,
}

pub const VECTOR_TABLE: &str = "vec_chunks";

impl IndexStore {
    /// Probe the sqlite-vec runtime once per store; later calls are cheap.
    pub fn vector_runtime_available(&self) -> bool {
        if let Some(ok) = self.vec_runtime.get() {
            return ok;
        }
        let ok = self.probe_vec_version().is_some();
        self.vec_runtime.set(Some(ok));
        ok
    }

    fn probe_vec_version(&self) -> Option<String> {
        self.conn
            .query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
            .ok()
    }

    pub fn has_vector_table(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [VECTOR_TABLE],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Activate the vector table for `(model, dims)`.
    ///
    /// With `dims == 0` or an unavailable runtime this returns
    /// [`VectorStatus::NotReady`] and search falls back to in-process
    /// cosine. A model or dimension change drops and recreates the table;
    /// the resolved extension version is persisted in the index metadata.
    pub fn ensure_vector_ready(&self, model: &str, dims: usize) -> Result<VectorStatus> {
        if dims == 0 {
            return Ok(VectorStatus::NotReady);
        }

        if !self.vector_runtime_available() {
            let mut meta = self.read_meta()?;
            meta.vec_extension = None;
            self.write_meta(&meta)?;
            return Ok(VectorStatus::NotReady);
        }

        let mut meta = self.read_meta()?;
        if meta.model != model || meta.dims != dims {
            self.conn
                .execute_batch(&format!("DROP TABLE IF EXISTS {VECTOR_TABLE}"))?;
        }
        self.conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {VECTOR_TABLE} USING vec0(
                id TEXT PRIMARY KEY,
                embedding FLOAT[{dims}] distance_metric=cosine
            )"
        ))?;

        meta.model = model.to_string();
        meta.dims = dims;
        meta.vec_extension = self.probe_vec_version();
        self.write_meta(&meta)?;

        Ok(VectorStatus::Ready)
    }

    /// Whether the native similarity path can serve queries right now.
    pub fn vector_search_available(&self) -> bool {
        self.vector_runtime_available() && self.has_vector_table().unwrap_or(false)
    }

    pub fn insert_vector(&self, id: &str, embedding: &[f32]) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO {VECTOR_TABLE} (id, embedding) VALUES (?1, ?2)"),
            params![id, embedding_to_bytes(embedding)],
        )?;
        Ok(())
    }

    /// Delete vector rows belonging to a file's chunks.
    pub fn delete_vectors_for_path(&self, path: &str) -> Result<()> {
        self.conn.execute(
            &format!(
                "DELETE FROM {VECTOR_TABLE}
                 WHERE id IN (SELECT id FROM chunks WHERE path = ?1)"
            ),
            [path],
        )?;
        Ok(())
    }

    /// Delete vector rows whose chunk row no longer exists. Armed once per
    /// store lifetime; later calls are no-ops.
    pub fn purge_orphan_vectors_once(&self) -> Result<usize> {
        if self.orphans_purged.get() {
            return Ok(0);
        }
        self.orphans_purged.set(true);
        let rows = self.conn.execute(
            &format!("DELETE FROM {VECTOR_TABLE} WHERE id NOT IN (SELECT id FROM chunks)"),
            [],
        )?;
        if rows > 0 {
            tracing::debug!(rows, "purged orphaned vector rows");
        }
        Ok(rows)
    }

    pub fn drop_vector_table(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {VECTOR_TABLE}"))?;
        Ok(())
    }

    pub fn vector_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {VECTOR_TABLE}"), [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    // ── Embedding cache ──────────────────────────────────────────────────

    /// Look up cached embeddings for `(model, hash)` pairs. Rows with an
    /// empty stored embedding count as missing. `hashes` must respect the
    /// caller's lookup batch size so the parameter count stays bounded.
    pub fn cache_lookup(
        &self,
        model: &str,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::new();
        if hashes.is_empty() {
            return Ok(found);
        }

        let placeholders: Vec<String> = (2..=hashes.len() + 1).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT hash, embedding FROM embedding_cache
             WHERE model = ?1 AND hash IN ({})",
            placeholders.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let mut bindings: Vec<&dyn rusqlite::types::ToSql> = vec![&model];
        for hash in hashes {
            bindings.push(hash);
        }

        let rows = stmt.query_map(bindings.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (hash, raw) = row?;
            let embedding: Vec<f32> = serde_json::from_str(&raw).unwrap_or_default();
            if !embedding.is_empty() {
                found.insert(hash, embedding);
            }
        }
        Ok(found)
    }

    pub fn cache_upsert(
        &self,
        model: &str,
        hash: &str,
        embedding: &[f32],
        now: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO embedding_cache (model, hash, embedding, dims, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(model, hash) DO UPDATE SET
               embedding = excluded.embedding, dims = excluded.dims,
               updated_at = excluded.updated_at",
            params![
                model,
                hash,
                serde_json::to_string(embedding)?,
                embedding.len() as i64,
                now
            ],
        )?;
        Ok(())
    }

    pub fn cache_count(&self, model: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM embedding_cache WHERE model = ?1",
            [model],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Convert an f32 embedding to bytes (little-endian) for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Compute cosine similarity between two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
