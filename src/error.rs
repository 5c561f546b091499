//! Error types for mem-cli.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mem-cli.
///
/// Commands surface these to the user with exit code 1; the daemon captures
/// them in the `stderr` field of its response instead of crashing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("workspace not initialized at {0} — run `mem-cli init` first")]
    WorkspaceNotInitialized(PathBuf),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("embeddings unavailable: {0}")]
    EmbeddingsUnavailable(String),

    #[error("timed out waiting for lock {path} after {waited_ms}ms")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("daemon error: {0}")]
    Daemon(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether a command that writes Markdown can still proceed after this
    /// error (adding content degrades to indexing without embeddings).
    pub fn is_embeddings_unavailable(&self) -> bool {
        matches!(self, Self::EmbeddingsUnavailable(_))
    }
}
