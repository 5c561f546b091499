//! Incremental sync engine.
//!
//! Keeps the index consistent with the on-disk Markdown tree. Mutation is
//! serialized by the per-workspace lock file; each file is rewritten inside
//! a single `IMMEDIATE` transaction, so a crash leaves either the old or
//! the new state for that file, never a mix. Embedding errors abort the
//! sync — no half-embedded files are written.

use super::cache;
use super::chunker::{chunk_markdown, Chunk};
use super::{chunk_id, hash_text, now_ms};
use crate::config::Settings;
use crate::db::{ChunkRow, FileRecord, IndexStore, VectorStatus};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::lock;
use crate::workspace::Workspace;
use std::collections::HashSet;
use std::path::Path;

/// What a sync pass did.
#[derive(Debug, Default, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub indexed_files: usize,
    pub deleted_files: usize,
    pub total_files: usize,
    pub total_chunks: usize,
}

fn file_state(abs_path: &Path) -> Result<(String, i64, i64, String)> {
    let content = std::fs::read_to_string(abs_path)?;
    let meta = std::fs::metadata(abs_path)?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok((hash_text(&content), mtime, meta.len() as i64, content))
}

fn disk_mtime_size(abs_path: &Path) -> Result<(i64, i64)> {
    let meta = std::fs::metadata(abs_path)?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok((mtime, meta.len() as i64))
}

fn chunking_drifted(store: &IndexStore, settings: &Settings) -> Result<bool> {
    Ok(store.read_meta()?.chunking.as_ref() != Some(&settings.chunking))
}

fn model_drifted(store: &IndexStore, provider: Option<&dyn EmbeddingProvider>) -> Result<bool> {
    match provider {
        Some(provider) => Ok(store.read_meta()?.model != provider.model_path()),
        None => Ok(false),
    }
}

/// Whether the index disagrees with the on-disk tree or the active
/// configuration. Cheap: hashes are only recomputed for files whose
/// `(mtime, size)` moved.
pub fn needs_update(
    workspace: &Workspace,
    store: &IndexStore,
    settings: &Settings,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<bool> {
    if chunking_drifted(store, settings)? || model_drifted(store, provider)? {
        return Ok(true);
    }

    let disk_files = workspace.list_memory_files()?;
    let mut seen: HashSet<&str> = HashSet::new();

    for (rel_path, abs_path) in &disk_files {
        seen.insert(rel_path.as_str());
        match store.get_file(rel_path)? {
            None => return Ok(true),
            Some(record) => {
                let (mtime, size) = disk_mtime_size(abs_path)?;
                if mtime != record.mtime || size != record.size {
                    let content = std::fs::read_to_string(abs_path)?;
                    if hash_text(&content) != record.hash {
                        return Ok(true);
                    }
                }
            }
        }
    }

    for record in store.list_files()? {
        if !seen.contains(record.path.as_str()) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Bring the index up to date under the workspace's index lock.
///
/// Chunking or model drift escalates to a full [`reindex`] under the same
/// lock. The lock is released on success and on any failure.
pub fn ensure_up_to_date(
    workspace: &Workspace,
    store: &IndexStore,
    settings: &Settings,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<SyncOutcome> {
    let _lock = lock::acquire(workspace.index_lock_path())?;
    sync_locked(workspace, store, settings, provider)
}

/// Rebuild the index from scratch under the workspace's index lock.
pub fn reindex(
    workspace: &Workspace,
    store: &IndexStore,
    settings: &Settings,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<SyncOutcome> {
    let _lock = lock::acquire(workspace.index_lock_path())?;
    reindex_locked(workspace, store, settings, provider)
}

fn outcome(store: &IndexStore, indexed: usize, deleted: usize) -> Result<SyncOutcome> {
    Ok(SyncOutcome {
        indexed_files: indexed,
        deleted_files: deleted,
        total_files: store.file_count()?,
        total_chunks: store.chunk_count()?,
    })
}

fn sync_locked(
    workspace: &Workspace,
    store: &IndexStore,
    settings: &Settings,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<SyncOutcome> {
    // Another process may have finished the work while we waited.
    if !needs_update(workspace, store, settings, provider)? {
        return outcome(store, 0, 0);
    }

    if chunking_drifted(store, settings)? || model_drifted(store, provider)? {
        return reindex_locked(workspace, store, settings, provider);
    }

    if store.vector_search_available() {
        store.purge_orphan_vectors_once()?;
    }

    let disk_files = workspace.list_memory_files()?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut indexed = 0usize;

    for (rel_path, abs_path) in &disk_files {
        seen.insert(rel_path.clone());
        match store.get_file(rel_path)? {
            None => {
                index_file(store, settings, provider, rel_path, abs_path)?;
                indexed += 1;
            }
            Some(record) => {
                let (mtime, size) = disk_mtime_size(abs_path)?;
                if mtime == record.mtime && size == record.size {
                    continue;
                }
                let content = std::fs::read_to_string(abs_path)?;
                if hash_text(&content) != record.hash {
                    index_file(store, settings, provider, rel_path, abs_path)?;
                    indexed += 1;
                } else {
                    store.touch_file(rel_path, mtime, size)?;
                }
            }
        }
    }

    let mut deleted = 0usize;
    for record in store.list_files()? {
        if seen.contains(&record.path) {
            continue;
        }
        if store.vector_search_available() {
            store.delete_vectors_for_path(&record.path)?;
        }
        store.delete_chunks_for_path(&record.path)?;
        store.delete_file(&record.path)?;
        deleted += 1;
    }

    tracing::debug!(indexed, deleted, "sync complete");
    outcome(store, indexed, deleted)
}

fn reindex_locked(
    workspace: &Workspace,
    store: &IndexStore,
    settings: &Settings,
    provider: Option<&dyn EmbeddingProvider>,
) -> Result<SyncOutcome> {
    let mut meta = store.read_meta()?;
    meta.chunking = Some(settings.chunking.clone());
    if provider.is_none() {
        meta.model = String::new();
        meta.dims = 0;
    }
    store.write_meta(&meta)?;

    store.delete_all_chunks()?;

    if store.has_vector_table()? {
        if store.vector_runtime_available() {
            store.drop_vector_table()?;
        } else if provider.is_some() {
            // Stale vectors cannot safely be left behind.
            return Err(Error::Index(
                "vector extension unavailable while rebuilding an embedded index".into(),
            ));
        }
    }

    store.delete_all_files()?;

    let mut indexed = 0usize;
    for (rel_path, abs_path) in workspace.list_memory_files()? {
        index_file(store, settings, provider, &rel_path, &abs_path)?;
        indexed += 1;
    }

    tracing::info!(files = indexed, "reindex complete");
    outcome(store, indexed, 0)
}

/// Rewrite one file's chunk, vector, and file rows atomically.
fn index_file(
    store: &IndexStore,
    settings: &Settings,
    provider: Option<&dyn EmbeddingProvider>,
    rel_path: &str,
    abs_path: &Path,
) -> Result<()> {
    let (hash, mtime, size, content) = file_state(abs_path)?;

    let chunks: Vec<Chunk> = chunk_markdown(&content, &settings.chunking)
        .into_iter()
        .filter(|chunk| !chunk.content.trim().is_empty())
        .collect();

    let (model, embeddings, vector_ready) = match provider {
        Some(provider) => {
            let embeddings = cache::embed_chunks(store, provider, &chunks, &settings.embeddings)?;
            let dims = embeddings
                .iter()
                .find(|e| !e.is_empty())
                .map(|e| e.len())
                .unwrap_or(0);
            let status = store.ensure_vector_ready(provider.model_path(), dims)?;
            (
                provider.model_path().to_string(),
                embeddings,
                status == VectorStatus::Ready,
            )
        }
        None => (String::new(), vec![Vec::new(); chunks.len()], false),
    };

    let now = now_ms();

    store.conn.execute("BEGIN IMMEDIATE", [])?;
    let result = (|| -> Result<()> {
        if vector_ready {
            store.delete_vectors_for_path(rel_path)?;
        }
        store.delete_chunks_for_path(rel_path)?;

        for (ordinal, (chunk, embedding)) in chunks.iter().zip(&embeddings).enumerate() {
            let id = chunk_id(rel_path, chunk.line_start, chunk.line_end, &chunk.hash, ordinal);
            store.insert_chunk(&ChunkRow {
                id: id.clone(),
                path: rel_path.to_string(),
                line_start: chunk.line_start,
                line_end: chunk.line_end,
                hash: chunk.hash.clone(),
                model: model.clone(),
                content: chunk.content.clone(),
                embedding: serde_json::to_string(embedding)?,
                updated_at: now,
            })?;
            if vector_ready && !embedding.is_empty() {
                store.insert_vector(&id, embedding)?;
            }
        }

        store.upsert_file(&FileRecord {
            path: rel_path.to_string(),
            hash,
            mtime,
            size,
        })?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            store.conn.execute("COMMIT", [])?;
            Ok(())
        }
        Err(e) => {
            let _ = store.conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::mock::MockProvider;
    use crate::workspace::WorkspaceKind;
    use std::time::Duration;

    fn test_workspace(tmp: &tempfile::TempDir) -> Workspace {
        let ws = Workspace::with_root(tmp.path(), WorkspaceKind::Public);
        std::fs::create_dir_all(ws.memory_dir()).unwrap();
        ws
    }

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.validate().unwrap();
        settings
    }

    #[test]
    fn fresh_workspace_reports_drift_then_settles() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = test_workspace(&tmp);
        std::fs::write(ws.long_memory_path(), "alpha\n").unwrap();

        let store = IndexStore::open(ws.index_path()).unwrap();
        let settings = test_settings();

        assert!(needs_update(&ws, &store, &settings, None).unwrap());
        let outcome = ensure_up_to_date(&ws, &store, &settings, None).unwrap();
        assert_eq!(outcome.total_files, 1);
        assert!(!needs_update(&ws, &store, &settings, None).unwrap());

        // Second run with unchanged inputs is a no-op.
        let again = ensure_up_to_date(&ws, &store, &settings, None).unwrap();
        assert_eq!(again.indexed_files, 0);
        assert_eq!(again.deleted_files, 0);
    }

    #[test]
    fn whitespace_only_content_yields_no_chunk_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = test_workspace(&tmp);
        std::fs::write(ws.long_memory_path(), "\n\n   \n").unwrap();

        let store = IndexStore::open(ws.index_path()).unwrap();
        ensure_up_to_date(&ws, &store, &test_settings(), None).unwrap();

        assert_eq!(store.chunk_count().unwrap(), 0);
        // The file itself is still tracked.
        assert_eq!(store.file_count().unwrap(), 1);
    }

    #[test]
    fn chunking_change_escalates_to_reindex() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = test_workspace(&tmp);
        std::fs::write(
            ws.long_memory_path(),
            (1..=20)
                .map(|i| format!("fact number {i}"))
                .collect::<Vec<_>>()
                .join("\n"),
        )
        .unwrap();

        let store = IndexStore::open(ws.index_path()).unwrap();
        let mut settings = test_settings();
        ensure_up_to_date(&ws, &store, &settings, None).unwrap();
        let before = store.chunk_count().unwrap();

        settings.chunking.tokens = 10;
        settings.chunking.overlap = 2;
        assert!(needs_update(&ws, &store, &settings, None).unwrap());
        ensure_up_to_date(&ws, &store, &settings, None).unwrap();

        let after = store.chunk_count().unwrap();
        assert!(after > before, "smaller chunks should multiply rows");
        assert_eq!(
            store.read_meta().unwrap().chunking,
            Some(settings.chunking.clone())
        );
    }

    #[test]
    fn provider_embeds_chunks_and_activates_vector_table() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = test_workspace(&tmp);
        std::fs::write(ws.long_memory_path(), "alpha\n").unwrap();
        std::fs::write(ws.memory_dir().join("2026-01-01.md"), "kiwi fruit\n").unwrap();

        let store = IndexStore::open(ws.index_path()).unwrap();
        let provider = MockProvider::new(8, Duration::ZERO);
        let settings = test_settings();

        ensure_up_to_date(&ws, &store, &settings, Some(&provider)).unwrap();

        assert!(store.vector_search_available());
        assert_eq!(store.vector_count().unwrap(), store.chunk_count().unwrap());
        let meta = store.read_meta().unwrap();
        assert_eq!(meta.model, "mock:8");
        assert_eq!(meta.dims, 8);

        // Idempotent under the same provider.
        assert!(!needs_update(&ws, &store, &settings, Some(&provider)).unwrap());
    }

    #[test]
    fn deleting_a_file_removes_all_its_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = test_workspace(&tmp);
        std::fs::write(ws.long_memory_path(), "alpha\n").unwrap();
        let dated = ws.memory_dir().join("2026-01-01.md");
        std::fs::write(&dated, "kiwi\n").unwrap();

        let store = IndexStore::open(ws.index_path()).unwrap();
        let provider = MockProvider::new(8, Duration::ZERO);
        let settings = test_settings();
        ensure_up_to_date(&ws, &store, &settings, Some(&provider)).unwrap();
        assert_eq!(store.chunk_count_for_path("memory/2026-01-01.md").unwrap(), 1);

        std::fs::remove_file(&dated).unwrap();
        assert!(needs_update(&ws, &store, &settings, Some(&provider)).unwrap());
        let outcome = ensure_up_to_date(&ws, &store, &settings, Some(&provider)).unwrap();
        assert_eq!(outcome.deleted_files, 1);

        assert_eq!(store.chunk_count_for_path("memory/2026-01-01.md").unwrap(), 0);
        assert!(store.get_file("memory/2026-01-01.md").unwrap().is_none());
        assert_eq!(store.vector_count().unwrap(), store.chunk_count().unwrap());
    }

    #[test]
    fn touch_only_changes_update_file_row_without_rechunking() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = test_workspace(&tmp);
        std::fs::write(ws.long_memory_path(), "alpha\n").unwrap();

        let store = IndexStore::open(ws.index_path()).unwrap();
        let settings = test_settings();
        ensure_up_to_date(&ws, &store, &settings, None).unwrap();
        let before = store.chunks_for_path("MEMORY.md").unwrap();

        // Rewrite identical content: hash unchanged, mtime very likely moved.
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(ws.long_memory_path(), "alpha\n").unwrap();
        ensure_up_to_date(&ws, &store, &settings, None).unwrap();

        let after = store.chunks_for_path("MEMORY.md").unwrap();
        assert_eq!(
            before.iter().map(|c| &c.id).collect::<Vec<_>>(),
            after.iter().map(|c| &c.id).collect::<Vec<_>>()
        );
        let record = store.get_file("MEMORY.md").unwrap().unwrap();
        let (mtime, size) = super::disk_mtime_size(&ws.long_memory_path()).unwrap();
        assert_eq!((record.mtime, record.size), (mtime, size));
    }

    #[test]
    fn chunk_ids_are_stable_across_reindex() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = test_workspace(&tmp);
        std::fs::write(ws.long_memory_path(), "alpha\nbeta\ngamma\n").unwrap();

        let store = IndexStore::open(ws.index_path()).unwrap();
        let settings = test_settings();
        reindex(&ws, &store, &settings, None).unwrap();
        let first: Vec<String> = store
            .chunks_for_path("MEMORY.md")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();

        reindex(&ws, &store, &settings, None).unwrap();
        let second: Vec<String> = store
            .chunks_for_path("MEMORY.md")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();

        assert_eq!(first, second);
    }
}
