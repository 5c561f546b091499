mod helpers;

use helpers::{bare_workspace, default_settings, small_chunk_settings, write_file};
use mem_cli::db::IndexStore;
use mem_cli::embedding::mock::MockProvider;
use mem_cli::index::sync::{ensure_up_to_date, needs_update, reindex};
use std::time::Duration;

#[test]
fn indexing_scope_is_long_memory_plus_memory_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = bare_workspace(tmp.path());
    write_file(&ws, "MEMORY.md", "alpha\n");
    write_file(&ws, "memory/2026-01-01.md", "# 2026-01-01\n\nkiwi\n");
    write_file(&ws, "notes.md", "SHOULD_NOT_BE_INDEXED secret-phrase\n");

    let store = IndexStore::open(ws.index_path()).unwrap();
    reindex(&ws, &store, &default_settings(), None).unwrap();

    assert!(store.chunk_count_for_path("MEMORY.md").unwrap() > 0);
    assert!(store.chunk_count_for_path("memory/2026-01-01.md").unwrap() > 0);
    assert_eq!(store.chunk_count_for_path("notes.md").unwrap(), 0);
    assert_eq!(store.chunk_count_for_path("memory.md").unwrap(), 0);
    assert!(store.get_file("notes.md").unwrap().is_none());
}

#[test]
fn overlapping_chunks_repeat_boundary_lines() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = bare_workspace(tmp.path());
    let fruits = [
        "apple", "banana", "cherry", "durian", "feijoa", "grape", "guava", "honeydew",
    ];
    let content = fruits
        .iter()
        .enumerate()
        .map(|(i, fruit)| format!("line-{}: {fruit}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    write_file(&ws, "MEMORY.md", &content);

    // maxChars = 40, overlapChars = 20
    let store = IndexStore::open(ws.index_path()).unwrap();
    reindex(&ws, &store, &small_chunk_settings(10, 5), None).unwrap();

    let chunks = store.chunks_for_path("MEMORY.md").unwrap();
    assert!(chunks.len() >= 2, "expected overlap to split the file");
    for pair in chunks.windows(2) {
        let boundary_line = pair[0].content.lines().last().unwrap();
        assert!(
            pair[1].content.contains(boundary_line),
            "second chunk should repeat {boundary_line:?}"
        );
    }
}

#[test]
fn long_single_line_is_split_into_bounded_chunks() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = bare_workspace(tmp.path());
    write_file(&ws, "MEMORY.md", &"a".repeat(65));

    // maxChars = 32, no overlap
    let store = IndexStore::open(ws.index_path()).unwrap();
    reindex(&ws, &store, &small_chunk_settings(5, 0), None).unwrap();

    let chunks = store.chunks_for_path("MEMORY.md").unwrap();
    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(chunk.content.chars().count() <= 32);
        assert_eq!((chunk.line_start, chunk.line_end), (1, 1));
    }
}

#[test]
fn empty_file_produces_no_chunks_or_vectors() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = bare_workspace(tmp.path());
    write_file(&ws, "MEMORY.md", "");

    let store = IndexStore::open(ws.index_path()).unwrap();
    let provider = MockProvider::new(8, Duration::ZERO);
    reindex(&ws, &store, &default_settings(), Some(&provider)).unwrap();

    assert_eq!(store.chunk_count().unwrap(), 0);
    // Empty file means no dims were ever derived, so no vector table.
    assert!(!store.has_vector_table().unwrap());
    assert_eq!(store.file_count().unwrap(), 1);
}

#[test]
fn missing_provider_indexes_with_empty_embeddings() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = bare_workspace(tmp.path());
    write_file(&ws, "MEMORY.md", "alpha\nbeta\n");

    let store = IndexStore::open(ws.index_path()).unwrap();
    reindex(&ws, &store, &default_settings(), None).unwrap();

    for chunk in store.chunks_for_path("MEMORY.md").unwrap() {
        assert_eq!(chunk.model, "");
        assert_eq!(chunk.embedding, "[]");
    }
    assert!(!store.has_vector_table().unwrap());
}

#[test]
fn deleting_a_file_purges_chunks_vectors_and_file_row() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = bare_workspace(tmp.path());
    write_file(&ws, "MEMORY.md", "alpha\n");
    write_file(&ws, "memory/gone.md", "ephemeral note\n");

    let store = IndexStore::open(ws.index_path()).unwrap();
    let provider = MockProvider::new(8, Duration::ZERO);
    let settings = default_settings();
    ensure_up_to_date(&ws, &store, &settings, Some(&provider)).unwrap();
    assert!(store.chunk_count_for_path("memory/gone.md").unwrap() > 0);

    std::fs::remove_file(ws.root().join("memory/gone.md")).unwrap();
    ensure_up_to_date(&ws, &store, &settings, Some(&provider)).unwrap();

    assert_eq!(store.chunk_count_for_path("memory/gone.md").unwrap(), 0);
    assert!(store.get_file("memory/gone.md").unwrap().is_none());
    assert_eq!(store.vector_count().unwrap(), store.chunk_count().unwrap());
}

#[test]
fn ensure_up_to_date_twice_is_a_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = bare_workspace(tmp.path());
    write_file(&ws, "MEMORY.md", "alpha\nbeta\ngamma\n");

    let store = IndexStore::open(ws.index_path()).unwrap();
    let provider = MockProvider::new(8, Duration::ZERO);
    let settings = default_settings();

    let first = ensure_up_to_date(&ws, &store, &settings, Some(&provider)).unwrap();
    assert!(first.indexed_files > 0);
    assert!(!needs_update(&ws, &store, &settings, Some(&provider)).unwrap());

    let second = ensure_up_to_date(&ws, &store, &settings, Some(&provider)).unwrap();
    assert_eq!(second.indexed_files, 0);
    assert_eq!(second.deleted_files, 0);
}

#[test]
fn reindex_then_sync_is_identical_except_timestamps() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = bare_workspace(tmp.path());
    write_file(&ws, "MEMORY.md", "alpha\nbeta\n");
    write_file(&ws, "memory/2026-02-02.md", "gamma\ndelta\n");

    let store = IndexStore::open(ws.index_path()).unwrap();
    let provider = MockProvider::new(8, Duration::ZERO);
    let settings = default_settings();

    reindex(&ws, &store, &settings, Some(&provider)).unwrap();
    let snapshot = |path: &str| {
        store
            .chunks_for_path(path)
            .unwrap()
            .into_iter()
            .map(|c| (c.id, c.hash, c.model, c.content, c.embedding))
            .collect::<Vec<_>>()
    };
    let before = (snapshot("MEMORY.md"), snapshot("memory/2026-02-02.md"));

    ensure_up_to_date(&ws, &store, &settings, Some(&provider)).unwrap();
    let after = (snapshot("MEMORY.md"), snapshot("memory/2026-02-02.md"));

    assert_eq!(before, after);
}

#[test]
fn changing_chunk_tokens_forces_reindex_with_fresh_vector_table() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = bare_workspace(tmp.path());
    let content = (1..=30)
        .map(|i| format!("remembered fact number {i}"))
        .collect::<Vec<_>>()
        .join("\n");
    write_file(&ws, "MEMORY.md", &content);

    let store = IndexStore::open(ws.index_path()).unwrap();
    let provider = MockProvider::new(8, Duration::ZERO);

    let coarse = default_settings();
    ensure_up_to_date(&ws, &store, &coarse, Some(&provider)).unwrap();
    let before = store.chunk_count().unwrap();

    let fine = small_chunk_settings(10, 2);
    assert!(needs_update(&ws, &store, &fine, Some(&provider)).unwrap());
    // Must not trip UNIQUE constraints while rebuilding the vector table.
    ensure_up_to_date(&ws, &store, &fine, Some(&provider)).unwrap();

    assert!(store.chunk_count().unwrap() > before);
    assert_eq!(store.vector_count().unwrap(), store.chunk_count().unwrap());
}
