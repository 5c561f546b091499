//! Vector similarity search over indexed chunks.
//!
//! The native path runs one KNN statement against the `vec_chunks` virtual
//! table joined with `chunks`. When the vector table or the sqlite-vec
//! runtime is unavailable, search falls back to streaming chunk rows and
//! computing cosine similarity in-process over their JSON embeddings.

use crate::db::vectors::{cosine_similarity, embedding_to_bytes, VECTOR_TABLE};
use crate::db::IndexStore;
use crate::error::Result;
use rusqlite::params;
use serde::Serialize;

/// One ranked search hit. `score` is the vector score `1 - distance`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub path: String,
    pub line_start: usize,
    pub line_end: usize,
    pub score: f32,
    pub snippet: String,
}

/// Rank chunks by cosine similarity against `query`, best first.
///
/// Returns no hits for an empty query vector or `k == 0`. `model` filters
/// hits to chunks indexed under that model identifier.
pub fn search_vector(
    store: &IndexStore,
    query: &[f32],
    k: usize,
    model: Option<&str>,
    snippet_max_chars: usize,
) -> Result<Vec<SearchHit>> {
    if query.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    if store.vector_search_available() {
        search_native(store, query, k, model, snippet_max_chars)
    } else {
        search_fallback(store, query, k, model, snippet_max_chars)
    }
}

fn search_native(
    store: &IndexStore,
    query: &[f32],
    k: usize,
    model: Option<&str>,
    snippet_max_chars: usize,
) -> Result<Vec<SearchHit>> {
    // KNN MATCH errors on an empty virtual table.
    let has_vectors: bool = store.conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {VECTOR_TABLE} LIMIT 1)"),
        [],
        |row| row.get(0),
    )?;
    if !has_vectors {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT c.path, c.line_start, c.line_end, c.content, knn.distance
         FROM (SELECT id, distance FROM {VECTOR_TABLE}
               WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2) AS knn
         JOIN chunks c ON c.id = knn.id
         WHERE ?3 IS NULL OR c.model = ?3
         ORDER BY knn.distance"
    );
    let mut stmt = store.conn.prepare(&sql)?;
    let hits = stmt
        .query_map(
            params![embedding_to_bytes(query), k as i64, model],
            |row| {
                let content: String = row.get(3)?;
                let distance: f64 = row.get(4)?;
                Ok(SearchHit {
                    path: row.get(0)?,
                    line_start: row.get::<_, i64>(1)? as usize,
                    line_end: row.get::<_, i64>(2)? as usize,
                    score: 1.0 - distance as f32,
                    snippet: snippet(&content, snippet_max_chars),
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(hits)
}

fn search_fallback(
    store: &IndexStore,
    query: &[f32],
    k: usize,
    model: Option<&str>,
    snippet_max_chars: usize,
) -> Result<Vec<SearchHit>> {
    let mut stmt = store.conn.prepare(
        "SELECT path, line_start, line_end, content, embedding FROM chunks
         WHERE ?1 IS NULL OR model = ?1",
    )?;

    let mut warned_mismatch = false;
    let rows = stmt.query_map(params![model], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)? as usize,
            row.get::<_, i64>(2)? as usize,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut hits: Vec<SearchHit> = Vec::new();
    for row in rows {
        let (path, line_start, line_end, content, raw_embedding) = row?;
        let embedding: Vec<f32> = serde_json::from_str(&raw_embedding).unwrap_or_default();

        let score = if embedding.len() != query.len() {
            if !warned_mismatch {
                tracing::warn!(
                    stored = embedding.len(),
                    query = query.len(),
                    "stored embedding length differs from query; scoring zero"
                );
                warned_mismatch = true;
            }
            0.0
        } else {
            cosine_similarity(query, &embedding)
        };

        hits.push(SearchHit {
            path,
            line_start,
            line_end,
            score,
            snippet: snippet(&content, snippet_max_chars),
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    Ok(hits)
}

/// Prefix of `content` up to `max_chars` characters, cut on a char
/// boundary. No word-boundary adjustment.
fn snippet(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ChunkRow;

    fn chunk(id: &str, path: &str, model: &str, embedding: &[f32], content: &str) -> ChunkRow {
        ChunkRow {
            id: id.into(),
            path: path.into(),
            line_start: 1,
            line_end: 1,
            hash: format!("hash-{id}"),
            model: model.into(),
            content: content.into(),
            embedding: serde_json::to_string(embedding).unwrap(),
            updated_at: 0,
        }
    }

    fn seeded_store(with_vectors: bool) -> IndexStore {
        let store = IndexStore::open_in_memory().unwrap();
        let rows = [
            chunk("a", "MEMORY.md", "m", &[1.0, 0.0, 0.0], "about apples"),
            chunk("b", "memory/b.md", "m", &[0.0, 1.0, 0.0], "about bananas"),
            chunk("c", "memory/c.md", "m", &[0.0, 0.0, 1.0], "about cherries"),
        ];
        if with_vectors {
            store.ensure_vector_ready("m", 3).unwrap();
        }
        for row in &rows {
            store.insert_chunk(row).unwrap();
            if with_vectors {
                let embedding: Vec<f32> = serde_json::from_str(&row.embedding).unwrap();
                store.insert_vector(&row.id, &embedding).unwrap();
            }
        }
        store
    }

    #[test]
    fn empty_query_or_zero_k_returns_nothing() {
        let store = seeded_store(true);
        assert!(search_vector(&store, &[], 5, None, 100).unwrap().is_empty());
        assert!(search_vector(&store, &[1.0, 0.0, 0.0], 0, None, 100)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn native_path_ranks_by_cosine_distance() {
        let store = seeded_store(true);
        let hits = search_vector(&store, &[0.9, 0.1, 0.0], 2, None, 100).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "MEMORY.md");
        assert!(hits[0].score > hits[1].score);
        assert!(hits[0].score > 0.9);
    }

    #[test]
    fn fallback_path_ranks_identically() {
        let store = seeded_store(false);
        assert!(!store.vector_search_available());
        let hits = search_vector(&store, &[0.9, 0.1, 0.0], 2, None, 100).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "MEMORY.md");
    }

    #[test]
    fn model_filter_excludes_other_models() {
        let store = seeded_store(false);
        store
            .insert_chunk(&chunk("d", "memory/d.md", "other", &[1.0, 0.0, 0.0], "decoy"))
            .unwrap();

        let hits = search_vector(&store, &[1.0, 0.0, 0.0], 10, Some("m"), 100).unwrap();
        assert!(hits.iter().all(|h| h.path != "memory/d.md"));
    }

    #[test]
    fn dimension_mismatch_scores_zero_in_fallback() {
        let store = IndexStore::open_in_memory().unwrap();
        store
            .insert_chunk(&chunk("short", "a.md", "m", &[1.0, 0.0], "two dims"))
            .unwrap();
        store
            .insert_chunk(&chunk("ok", "b.md", "m", &[1.0, 0.0, 0.0], "three dims"))
            .unwrap();

        let hits = search_vector(&store, &[1.0, 0.0, 0.0], 10, None, 100).unwrap();
        assert_eq!(hits[0].path, "b.md");
        let short = hits.iter().find(|h| h.path == "a.md").unwrap();
        assert_eq!(short.score, 0.0);
    }

    #[test]
    fn snippet_is_a_char_bounded_prefix() {
        assert_eq!(snippet("hello world", 5), "hello");
        assert_eq!(snippet("héllo", 2), "hé");
        assert_eq!(snippet("short", 100), "short");
    }
}
