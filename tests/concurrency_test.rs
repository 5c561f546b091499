mod helpers;

use helpers::{bare_workspace, default_settings, write_file};
use mem_cli::db::IndexStore;
use mem_cli::embedding::mock::MockProvider;
use mem_cli::index::sync::{ensure_up_to_date, needs_update};
use mem_cli::workspace::{Workspace, WorkspaceKind};
use std::time::Duration;

#[test]
fn concurrent_syncs_both_succeed_and_agree() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = bare_workspace(tmp.path());
    for i in 0..10 {
        write_file(&ws, &format!("memory/note-{i}.md"), &format!("note body {i}\n"));
    }
    write_file(&ws, "MEMORY.md", "long memory\n");

    let root = tmp.path().to_path_buf();
    let mut handles = Vec::new();
    for _ in 0..2 {
        let root = root.clone();
        handles.push(std::thread::spawn(move || {
            let ws = Workspace::with_root(&root, WorkspaceKind::Public);
            let store = IndexStore::open(ws.index_path()).unwrap();
            let provider = MockProvider::new(8, Duration::ZERO);
            ensure_up_to_date(&ws, &store, &default_settings(), Some(&provider)).unwrap()
        }));
    }

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Exactly one writer did the indexing; the other observed a fully
    // up-to-date index after the lock released.
    let indexed: Vec<usize> = outcomes.iter().map(|o| o.indexed_files).collect();
    assert!(indexed.contains(&11), "one sync indexes all files: {indexed:?}");
    assert_eq!(indexed.iter().filter(|n| **n == 0).count(), 1);

    let store = IndexStore::open(ws.index_path()).unwrap();
    let provider = MockProvider::new(8, Duration::ZERO);
    assert!(!needs_update(&ws, &store, &default_settings(), Some(&provider)).unwrap());
    assert_eq!(store.file_count().unwrap(), 11);
    assert_eq!(store.vector_count().unwrap(), store.chunk_count().unwrap());
}

#[test]
fn lock_file_is_gone_after_sync() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = bare_workspace(tmp.path());
    write_file(&ws, "MEMORY.md", "alpha\n");

    let store = IndexStore::open(ws.index_path()).unwrap();
    ensure_up_to_date(&ws, &store, &default_settings(), None).unwrap();

    assert!(!ws.index_lock_path().exists());
}
