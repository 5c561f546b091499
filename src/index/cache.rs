//! Embedding cache and batch pipeline.
//!
//! Maps chunk content to dense vectors while avoiding recomputation: cache
//! rows are keyed by `(model, chunk_hash)`, lookups run in bounded SQL
//! batches, and misses are grouped into provider calls by estimated token
//! count. Provider errors abort the surrounding sync — no half-embedded
//! files are ever written.

use crate::config::EmbeddingSettings;
use crate::db::IndexStore;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::{chunker::Chunk, now_ms};
use std::collections::HashMap;

/// Estimated token count for batch sizing.
fn estimate_tokens(text: &str, approx_chars_per_token: usize) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(approx_chars_per_token.max(1))
}

/// Resolve one embedding per chunk, in chunk order.
///
/// Cached embeddings are returned as-is; misses are computed through the
/// provider in token-bounded batches and written back to the cache. A chunk
/// whose estimate alone exceeds the budget forms a batch by itself.
pub fn embed_chunks(
    store: &IndexStore,
    provider: &dyn EmbeddingProvider,
    chunks: &[Chunk],
    settings: &EmbeddingSettings,
) -> Result<Vec<Vec<f32>>> {
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let model = provider.model_path();

    // Unique hashes, first-seen order.
    let mut unique_hashes: Vec<String> = Vec::new();
    let mut text_by_hash: HashMap<&str, &str> = HashMap::new();
    for chunk in chunks {
        if !text_by_hash.contains_key(chunk.hash.as_str()) {
            unique_hashes.push(chunk.hash.clone());
            text_by_hash.insert(&chunk.hash, &chunk.content);
        }
    }

    // Cache lookups in bounded batches to keep SQL parameter counts small.
    let mut resolved: HashMap<String, Vec<f32>> = HashMap::new();
    for window in unique_hashes.chunks(settings.cache_lookup_batch_size.max(1)) {
        resolved.extend(store.cache_lookup(model, window)?);
    }

    let missing: Vec<&str> = unique_hashes
        .iter()
        .map(|h| h.as_str())
        .filter(|h| !resolved.contains_key(*h))
        .collect();

    for batch in batch_by_tokens(&missing, &text_by_hash, settings) {
        let texts: Vec<String> = batch
            .iter()
            .map(|hash| text_by_hash[*hash].to_string())
            .collect();
        let embeddings = provider.embed_batch(&texts)?;
        if embeddings.len() != batch.len() {
            return Err(Error::EmbeddingsUnavailable(format!(
                "provider returned {} embeddings for {} texts",
                embeddings.len(),
                batch.len()
            )));
        }

        let now = now_ms();
        for (hash, embedding) in batch.iter().zip(embeddings) {
            store.cache_upsert(model, hash, &embedding, now)?;
            resolved.insert((*hash).to_string(), embedding);
        }
    }

    Ok(chunks
        .iter()
        .map(|chunk| resolved.get(&chunk.hash).cloned().unwrap_or_default())
        .collect())
}

/// Group hashes into provider batches whose estimated token totals stay
/// within `batch_max_tokens`.
fn batch_by_tokens<'a>(
    missing: &[&'a str],
    text_by_hash: &HashMap<&str, &str>,
    settings: &EmbeddingSettings,
) -> Vec<Vec<&'a str>> {
    let mut batches: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;

    for hash in missing {
        let tokens = estimate_tokens(text_by_hash[*hash], settings.approx_chars_per_token);
        if !current.is_empty() && current_tokens + tokens > settings.batch_max_tokens {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push(hash);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::hash_text;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Test provider that records every batch it receives.
    struct RecordingProvider {
        calls: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl RecordingProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
            }
        }
    }

    impl EmbeddingProvider for RecordingProvider {
        fn model_path(&self) -> &str {
            "test-model"
        }

        fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.chars().count() as f32, 1.0])
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(texts.len());
            texts.iter().map(|t| self.embed_query(t)).collect()
        }
    }

    fn chunk(content: &str) -> Chunk {
        Chunk {
            hash: hash_text(content),
            content: content.to_string(),
            line_start: 1,
            line_end: 1,
        }
    }

    fn settings() -> EmbeddingSettings {
        EmbeddingSettings {
            model_path: "test-model".into(),
            cache_dir: String::new(),
            batch_max_tokens: 4,
            approx_chars_per_token: 4,
            cache_lookup_batch_size: 2,
        }
    }

    #[test]
    fn results_align_with_input_order_and_duplicates_share_work() {
        let store = IndexStore::open_in_memory().unwrap();
        let provider = RecordingProvider::new();
        let chunks = vec![chunk("aaaa"), chunk("bbbb"), chunk("aaaa")];

        let embeddings = embed_chunks(&store, &provider, &chunks, &settings()).unwrap();
        assert_eq!(embeddings.len(), 3);
        assert_eq!(embeddings[0], embeddings[2]);
        assert_eq!(embeddings[0], vec![4.0, 1.0]);

        // Two unique hashes, one token each, budget 4 → a single batch of 2.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*provider.batch_sizes.lock().unwrap(), vec![2]);
    }

    #[test]
    fn cached_chunks_are_not_recomputed() {
        let store = IndexStore::open_in_memory().unwrap();
        let provider = RecordingProvider::new();
        let chunks = vec![chunk("first text"), chunk("second text")];

        embed_chunks(&store, &provider, &chunks, &settings()).unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // Same content again: everything resolves from the cache.
        embed_chunks(&store, &provider, &chunks, &settings()).unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.cache_count("test-model").unwrap(), 2);
    }

    #[test]
    fn batches_split_on_token_budget() {
        let store = IndexStore::open_in_memory().unwrap();
        let provider = RecordingProvider::new();
        // Each chunk estimates to 2 tokens (8 chars / 4); budget 4 → pairs.
        let chunks: Vec<Chunk> = (0..5).map(|i| chunk(&format!("content{i}"))).collect();

        embed_chunks(&store, &provider, &chunks, &settings()).unwrap();
        assert_eq!(*provider.batch_sizes.lock().unwrap(), vec![2, 2, 1]);
    }

    #[test]
    fn oversized_chunk_is_its_own_batch() {
        let store = IndexStore::open_in_memory().unwrap();
        let provider = RecordingProvider::new();
        let chunks = vec![chunk(&"x".repeat(100)), chunk("tiny")];

        embed_chunks(&store, &provider, &chunks, &settings()).unwrap();
        assert_eq!(*provider.batch_sizes.lock().unwrap(), vec![1, 1]);
    }

    /// Provider that always fails — errors must propagate.
    struct FailingProvider;

    impl EmbeddingProvider for FailingProvider {
        fn model_path(&self) -> &str {
            "failing"
        }
        fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::EmbeddingsUnavailable("boom".into()))
        }
        fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::EmbeddingsUnavailable("boom".into()))
        }
    }

    #[test]
    fn provider_errors_abort() {
        let store = IndexStore::open_in_memory().unwrap();
        let err = embed_chunks(&store, &FailingProvider, &[chunk("text")], &settings()).unwrap_err();
        assert!(matches!(err, Error::EmbeddingsUnavailable(_)));
    }
}
