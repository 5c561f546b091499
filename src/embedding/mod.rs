//! Text-to-vector embedding pipeline.
//!
//! The core consumes the [`EmbeddingProvider`] capability; implementations
//! are the local ONNX runtime ([`local`]) and a deterministic mock
//! ([`mock`]) used in tests and activated by `MEM_CLI_EMBEDDINGS_MOCK`.
//!
//! Providers are cached per process, keyed by the resolved model path and
//! cache directory, so a long-lived daemon loads the model exactly once
//! across requests. The counters exposed by [`runtime_stats`] prove this.

pub mod download;
pub mod local;
pub mod mock;

use crate::config::{env_truthy, EmbeddingSettings};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Capability that turns text into vectors, parameterized by a stable
/// model identifier.
pub trait EmbeddingProvider: Send + Sync {
    /// Opaque, stable identifier of the active model. Persisted as the
    /// chunk `model` column and used as the embedding-cache key component.
    fn model_path(&self) -> &str;

    /// Compute one vector for a query.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Compute one vector per text, in the same order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Process-wide load counters surfaced through the daemon's ping response.
#[derive(Default)]
struct RuntimeCounters {
    provider_create_count: AtomicU64,
    runtime_init_count: AtomicU64,
    model_load_count: AtomicU64,
    context_create_count: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStats {
    pub provider_cache_size: usize,
    pub provider_create_count: u64,
    pub runtime_init_count: u64,
    pub model_load_count: u64,
    pub context_create_count: u64,
    pub mock_enabled: bool,
}

type ProviderMap = HashMap<(String, String), Arc<dyn EmbeddingProvider>>;

fn counters() -> &'static RuntimeCounters {
    static COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();
    COUNTERS.get_or_init(RuntimeCounters::default)
}

fn provider_cache() -> &'static Mutex<ProviderMap> {
    static PROVIDERS: OnceLock<Mutex<ProviderMap>> = OnceLock::new();
    PROVIDERS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn record_runtime_init() {
    counters().runtime_init_count.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_model_load() {
    counters().model_load_count.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_context_create() {
    counters()
        .context_create_count
        .fetch_add(1, Ordering::Relaxed);
}

/// Whether the deterministic mock provider is active.
pub fn mock_enabled() -> bool {
    env_truthy("MEM_CLI_EMBEDDINGS_MOCK", false)
}

/// Snapshot the per-process embedding runtime counters.
pub fn runtime_stats() -> RuntimeStats {
    let cache_size = provider_cache()
        .lock()
        .map(|cache| cache.len())
        .unwrap_or(0);
    let counters = counters();
    RuntimeStats {
        provider_cache_size: cache_size,
        provider_create_count: counters.provider_create_count.load(Ordering::Relaxed),
        runtime_init_count: counters.runtime_init_count.load(Ordering::Relaxed),
        model_load_count: counters.model_load_count.load(Ordering::Relaxed),
        context_create_count: counters.context_create_count.load(Ordering::Relaxed),
        mock_enabled: mock_enabled(),
    }
}

/// Create (or reuse) the embedding provider for `settings`.
///
/// The cache key is `(resolved model path, resolved cache dir)` — the same
/// settings always reuse the already-loaded model. Any load failure maps to
/// [`Error::EmbeddingsUnavailable`] so callers can decide whether to
/// degrade (adding content) or fail (pure-vector search).
pub fn create_provider(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    let cache_dir = crate::config::expand_tilde(&settings.cache_dir);

    let key = if mock_enabled() {
        (format!("mock:{}", mock::mock_dims()), String::new())
    } else {
        let resolved = download::resolve_model(&settings.model_path, &cache_dir)?;
        (
            resolved.to_string_lossy().into_owned(),
            cache_dir.to_string_lossy().into_owned(),
        )
    };

    let mut cache = provider_cache()
        .lock()
        .map_err(|_| Error::EmbeddingsUnavailable("provider cache poisoned".into()))?;

    if let Some(provider) = cache.get(&key) {
        return Ok(Arc::clone(provider));
    }

    let provider: Arc<dyn EmbeddingProvider> = if mock_enabled() {
        Arc::new(mock::MockProvider::from_env())
    } else {
        Arc::new(local::LocalProvider::new(
            &settings.model_path,
            std::path::Path::new(&key.0),
        )?)
    };

    counters()
        .provider_create_count
        .fetch_add(1, Ordering::Relaxed);
    cache.insert(key, Arc::clone(&provider));
    tracing::info!(model = provider.model_path(), "embedding provider ready");
    Ok(provider)
}
