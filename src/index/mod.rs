//! Indexing pipeline — chunking, embedding cache, and incremental sync.
//!
//! The write path is: Markdown files → [`chunker`] → [`cache`] (embeddings)
//! → chunk/vector rows in the index store, driven by [`sync`] under the
//! workspace's index lock.

pub mod cache;
pub mod chunker;
pub mod sync;

use sha2::{Digest, Sha256};

/// Hash text with SHA-256, hex-encoded.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Milliseconds since the Unix epoch, floored to an integer.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Stable chunk-row id: SHA-256 over the identifying fields of a chunk.
pub fn chunk_id(
    rel_path: &str,
    line_start: usize,
    line_end: usize,
    content_hash: &str,
    ordinal: usize,
) -> String {
    hash_text(&format!(
        "{rel_path}:{line_start}:{line_end}:{content_hash}:{ordinal}"
    ))
}
