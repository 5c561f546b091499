//! Local agent memory: Markdown workspaces with a durable vector-search
//! index.
//!
//! mem-cli stores an agent's notes as plain Markdown files in per-user
//! workspaces, maintains an incremental SQLite index over them, and answers
//! free-text queries by cosine similarity over locally computed embeddings.
//!
//! # Architecture
//!
//! - **Storage**: one SQLite file per workspace with a
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) `vec0` virtual
//!   table for similarity search, and an in-process cosine fallback when
//!   the extension is unavailable
//! - **Embeddings**: local ONNX Runtime (sentence-transformer exports), a
//!   content-addressed `(model, chunk-hash)` cache, and a deterministic
//!   mock provider for tests
//! - **Sync**: hash-based incremental indexing under a per-workspace file
//!   lock, with transactional per-file rewrites
//! - **Daemon**: a per-user Unix-socket worker that keeps the embedding
//!   model warm across CLI invocations and serializes command execution
//!
//! # Modules
//!
//! - [`config`] — settings loading from TOML and environment variables
//! - [`workspace`] — workspace layout, lifecycle, and token selectors
//! - [`db`] — index store: schema, vector table lifecycle, embedding cache
//! - [`index`] — chunker, embedding batch pipeline, and the sync engine
//! - [`search`] — vector search with native and fallback paths
//! - [`lock`] — cross-process advisory file lock
//! - [`daemon`] — wire protocol, serve loop, and connect-or-spawn client
//! - [`embedding`] — the `EmbeddingProvider` capability and its
//!   implementations
//! - [`cli`] — command implementations writing through explicit sinks

pub mod cli;
pub mod config;
pub mod daemon;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod lock;
pub mod search;
pub mod workspace;

pub use error::{Error, Result};
