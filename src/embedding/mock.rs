//! Deterministic mock embedding provider.
//!
//! Produces SHA-256-derived unit vectors: the same text always maps to the
//! same embedding, distinct texts map to (almost certainly) distinct
//! directions. Activated by `MEM_CLI_EMBEDDINGS_MOCK`; dimension and a
//! simulated model-load delay come from `MEM_CLI_EMBEDDINGS_MOCK_DIMS` and
//! `MEM_CLI_EMBEDDINGS_MOCK_LOAD_MS`.

use super::EmbeddingProvider;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::time::Duration;

pub const DEFAULT_MOCK_DIMS: usize = 16;

/// Dimension the mock provider produces.
pub fn mock_dims() -> usize {
    std::env::var("MEM_CLI_EMBEDDINGS_MOCK_DIMS")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|dims| *dims > 0)
        .unwrap_or(DEFAULT_MOCK_DIMS)
}

fn mock_load_delay() -> Duration {
    let ms = std::env::var("MEM_CLI_EMBEDDINGS_MOCK_LOAD_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(0);
    Duration::from_millis(ms)
}

pub struct MockProvider {
    model: String,
    dims: usize,
}

impl MockProvider {
    /// Build from the `MEM_CLI_EMBEDDINGS_MOCK_*` environment, simulating
    /// the model load (delay + counters) exactly once per construction.
    pub fn from_env() -> Self {
        Self::new(mock_dims(), mock_load_delay())
    }

    pub fn new(dims: usize, load_delay: Duration) -> Self {
        if !load_delay.is_zero() {
            std::thread::sleep(load_delay);
        }
        super::record_runtime_init();
        super::record_model_load();
        super::record_context_create();
        tracing::debug!(dims, "mock embedding model loaded");
        Self {
            model: format!("mock:{dims}"),
            dims,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        // Stretch the digest over any dimension by hashing counter blocks.
        let mut bytes = Vec::with_capacity(self.dims);
        let mut block = 0u32;
        while bytes.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(block.to_le_bytes());
            bytes.extend_from_slice(&hasher.finalize());
            block += 1;
        }

        let mut vector: Vec<f32> = bytes[..self.dims]
            .iter()
            .map(|b| (*b as f32 / 255.0) * 2.0 - 1.0)
            .collect();

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl EmbeddingProvider for MockProvider {
    fn model_path(&self) -> &str {
        &self.model
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
