//! Configuration loading from TOML files and environment variables.
//!
//! Settings live at `<data-dir>/config.toml`. Every section has defaults so
//! a missing file yields a usable configuration. `MEM_CLI_DATA_DIR` moves
//! the whole data directory (workspaces, models, config) — tests rely on
//! this to run against a temp directory.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingSettings,
    pub embeddings: EmbeddingSettings,
    pub search: SearchSettings,
    pub daemon: DaemonSettings,
    pub debug: DebugSettings,
}

#[derive(Debug, serde::Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ChunkingSettings {
    pub tokens: usize,
    pub overlap: usize,
    pub min_chars: usize,
    pub chars_per_token: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct EmbeddingSettings {
    /// Opaque model identifier: a local path, `hf:<org>/<repo>`, or an
    /// `http(s)://` base URL. Persisted verbatim as the index model column.
    pub model_path: String,
    /// Local directory remote models are downloaded into.
    pub cache_dir: String,
    pub batch_max_tokens: usize,
    pub approx_chars_per_token: usize,
    pub cache_lookup_batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchSettings {
    pub limit: usize,
    pub snippet_max_chars: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct DaemonSettings {
    pub idle_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DebugSettings {
    pub vector: bool,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            tokens: 512,
            overlap: 50,
            min_chars: 32,
            chars_per_token: 4,
        }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        let cache_dir = data_dir().join("models").to_string_lossy().into_owned();
        Self {
            model_path: "hf:sentence-transformers/all-MiniLM-L6-v2".into(),
            cache_dir,
            batch_max_tokens: 8000,
            approx_chars_per_token: 4,
            cache_lookup_batch_size: 256,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            limit: 6,
            snippet_max_chars: 700,
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self { idle_ms: 300_000 }
    }
}

/// Returns the data directory: `$MEM_CLI_DATA_DIR` or `~/.mem-cli`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MEM_CLI_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mem-cli")
}

/// Returns the default config file path: `<data-dir>/config.toml`.
pub fn default_config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Interpret an env var as a boolean switch. Unset returns `default`.
pub fn env_truthy(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(val) => {
            let val = val.trim().to_ascii_lowercase();
            !matches!(val.as_str(), "" | "0" | "false" | "no" | "off")
        }
        Err(_) => default,
    }
}

impl Settings {
    /// Load config from the default path, validate, and clamp.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, validate, and clamp.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut settings = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?
        } else {
            info!("no config file at {}, using defaults", path.display());
            Settings::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Enforce the documented bounds, clamping where the contract clamps.
    pub fn validate(&mut self) -> Result<()> {
        if self.chunking.tokens < 1 {
            return Err(Error::Config("chunking.tokens must be >= 1".into()));
        }
        if self.chunking.min_chars < 1 {
            return Err(Error::Config("chunking.minChars must be >= 1".into()));
        }
        if self.chunking.chars_per_token < 1 {
            return Err(Error::Config("chunking.charsPerToken must be >= 1".into()));
        }
        // overlap is clamped, not rejected
        if self.chunking.overlap >= self.chunking.tokens {
            self.chunking.overlap = self.chunking.tokens - 1;
        }
        if self.embeddings.model_path.trim().is_empty() {
            return Err(Error::Config(
                "embeddings.modelPath must not be empty".into(),
            ));
        }
        if self.embeddings.cache_lookup_batch_size == 0 {
            self.embeddings.cache_lookup_batch_size = 1;
        }
        if self.embeddings.batch_max_tokens == 0 {
            self.embeddings.batch_max_tokens = 1;
        }
        if self.embeddings.approx_chars_per_token == 0 {
            self.embeddings.approx_chars_per_token = 1;
        }
        Ok(())
    }

    /// Resolve the embeddings cache directory, expanding `~` if needed.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        expand_tilde(&self.embeddings.cache_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
