//! Workspace layout and lifecycle.
//!
//! A workspace is a directory holding one logical collection of memory
//! files plus its private index and lock file:
//!
//! - `MEMORY.md` — long-term memory file
//! - `memory/` — dated or freely named Markdown notes
//! - `index.db` / `index.db.lock` — the search index and its writer lock
//! - `meta.json` — workspace kind and token hash
//!
//! Workspaces live under `<data-dir>/workspaces/`. The public workspace sits
//! in `public/`; a token-protected workspace sits in a directory named by
//! the first 12 hex chars of the token's SHA-256.

use crate::config;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const LONG_MEMORY_FILE: &str = "MEMORY.md";
pub const MEMORY_DIR: &str = "memory";
pub const INDEX_FILE: &str = "index.db";
pub const META_FILE: &str = "meta.json";

const META_VERSION: u32 = 1;

/// How a workspace is addressed and protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceKind {
    Public,
    Token,
}

impl WorkspaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Token => "token",
        }
    }
}

/// Contents of `meta.json`. Owned by the lifecycle code, not the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMeta {
    pub version: u32,
    pub kind: WorkspaceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_hash: Option<String>,
    pub created_at: String,
}

/// Canonical sub-paths of a workspace root.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    pub kind: WorkspaceKind,
}

/// Which workspace a command addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Public,
    Token(String),
}

impl Selector {
    /// Resolve `--public` / `--token` flags plus the `MEM_CLI_TOKEN` default
    /// into a selector. The two flags are contradictory.
    pub fn from_flags(public: bool, token: Option<String>) -> Result<Self> {
        match (public, token) {
            (true, Some(_)) => Err(Error::InvalidInput(
                "--public and --token are mutually exclusive".into(),
            )),
            (true, None) => Ok(Self::Public),
            (false, Some(token)) => Ok(Self::Token(token)),
            (false, None) => match std::env::var("MEM_CLI_TOKEN") {
                Ok(token) if !token.trim().is_empty() => Ok(Self::Token(token)),
                _ => Ok(Self::Public),
            },
        }
    }

    pub fn kind(&self) -> WorkspaceKind {
        match self {
            Self::Public => WorkspaceKind::Public,
            Self::Token(_) => WorkspaceKind::Token,
        }
    }
}

/// SHA-256 of a workspace token, hex-encoded.
pub fn token_hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Root directory holding every workspace.
pub fn workspaces_dir() -> PathBuf {
    config::data_dir().join("workspaces")
}

fn selector_root(selector: &Selector) -> PathBuf {
    match selector {
        Selector::Public => workspaces_dir().join("public"),
        Selector::Token(token) => {
            let hash = token_hash(token);
            workspaces_dir().join(&hash[..12])
        }
    }
}

impl Workspace {
    /// Wrap an arbitrary directory as a workspace without consulting the
    /// registry or `meta.json`. The directory is used as-is; `memory/` is
    /// created on demand by callers that write into it.
    pub fn with_root(root: impl Into<PathBuf>, kind: WorkspaceKind) -> Self {
        Self {
            root: root.into(),
            kind,
        }
    }

    /// Open an existing workspace addressed by `selector`, verifying its
    /// kind and token hash against `meta.json`.
    pub fn open(selector: &Selector) -> Result<Self> {
        let root = selector_root(selector);
        let meta_path = root.join(META_FILE);
        if !meta_path.exists() {
            return Err(Error::WorkspaceNotInitialized(root));
        }

        let raw = std::fs::read_to_string(&meta_path)?;
        let meta: WorkspaceMeta = serde_json::from_str(&raw)?;

        if meta.kind != selector.kind() {
            return Err(Error::AccessDenied(format!(
                "workspace at {} is {}, not {}",
                root.display(),
                meta.kind.as_str(),
                selector.kind().as_str()
            )));
        }
        if let Selector::Token(token) = selector {
            if meta.token_hash.as_deref() != Some(token_hash(token).as_str()) {
                return Err(Error::AccessDenied("workspace token mismatch".into()));
            }
        }

        Ok(Self {
            root,
            kind: meta.kind,
        })
    }

    /// Create a workspace for `selector`. Fails if it already exists.
    pub fn init(selector: &Selector) -> Result<Self> {
        let root = selector_root(selector);
        if root.join(META_FILE).exists() {
            return Err(Error::InvalidInput(format!(
                "workspace already initialized at {}",
                root.display()
            )));
        }

        std::fs::create_dir_all(root.join(MEMORY_DIR))?;

        let long_memory = root.join(LONG_MEMORY_FILE);
        if !long_memory.exists() {
            std::fs::write(
                &long_memory,
                "# Memory\n\nPersistent notes, preferences, and context.\n",
            )?;
        }

        let meta = WorkspaceMeta {
            version: META_VERSION,
            kind: selector.kind(),
            token_hash: match selector {
                Selector::Public => None,
                Selector::Token(token) => Some(token_hash(token)),
            },
            created_at: Utc::now().to_rfc3339(),
        };
        std::fs::write(root.join(META_FILE), serde_json::to_string_pretty(&meta)?)?;

        tracing::info!(root = %root.display(), kind = meta.kind.as_str(), "workspace initialized");
        Ok(Self {
            root,
            kind: meta.kind,
        })
    }

    /// Remove the workspace directory and everything in it.
    pub fn destroy(self) -> Result<()> {
        std::fs::remove_dir_all(&self.root)?;
        Ok(())
    }

    /// Every initialized workspace under the workspaces directory.
    pub fn list_all() -> Result<Vec<Workspace>> {
        let dir = workspaces_dir();
        let mut found = Vec::new();
        if !dir.exists() {
            return Ok(found);
        }
        let mut entries: Vec<_> = std::fs::read_dir(&dir)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let root = entry.path();
            let meta_path = root.join(META_FILE);
            if !meta_path.exists() {
                continue;
            }
            let raw = std::fs::read_to_string(&meta_path)?;
            let meta: WorkspaceMeta = serde_json::from_str(&raw)?;
            found.push(Workspace {
                root,
                kind: meta.kind,
            });
        }
        Ok(found)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn long_memory_path(&self) -> PathBuf {
        self.root.join(LONG_MEMORY_FILE)
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join(MEMORY_DIR)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn index_lock_path(&self) -> PathBuf {
        self.root.join(format!("{INDEX_FILE}.lock"))
    }

    /// List the indexable Markdown files as `(rel_path, abs_path)` pairs:
    /// the long-memory file if present, plus every `*.md` descendant of
    /// `memory/`. Symlinks are skipped. Relative paths use forward slashes.
    pub fn list_memory_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();

        let long_memory = self.long_memory_path();
        if long_memory.is_file() {
            files.push((LONG_MEMORY_FILE.to_string(), long_memory));
        }

        let memory_dir = self.memory_dir();
        if memory_dir.is_dir() {
            let walker = walkdir::WalkDir::new(&memory_dir)
                .follow_links(false)
                .sort_by_file_name();
            for entry in walker {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.path_is_symlink() {
                    continue;
                }
                if entry.path().extension().map_or(true, |ext| ext != "md") {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&self.root)
                    .map_err(|_| Error::Index("memory file escapes workspace root".into()))?;
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((rel, entry.path().to_path_buf()));
            }
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    // MEM_CLI_DATA_DIR is process-global; serialize the tests that set it.
    fn env_lock() -> MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    struct DataDirGuard(MutexGuard<'static, ()>);

    impl Drop for DataDirGuard {
        fn drop(&mut self) {
            std::env::remove_var("MEM_CLI_DATA_DIR");
        }
    }

    fn scoped_data_dir(tmp: &tempfile::TempDir) -> DataDirGuard {
        let guard = env_lock();
        std::env::set_var("MEM_CLI_DATA_DIR", tmp.path());
        DataDirGuard(guard)
    }

    #[test]
    fn token_hash_is_sha256_hex() {
        let hash = token_hash("secret");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, token_hash("other"));
    }

    #[test]
    fn selector_flags_are_contradictory() {
        let err = Selector::from_flags(true, Some("t".into())).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn init_open_destroy_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let _guard = scoped_data_dir(&tmp);

        let selector = Selector::Token("alpha-token".into());
        let ws = Workspace::init(&selector).unwrap();
        assert!(ws.long_memory_path().exists());
        assert!(ws.memory_dir().is_dir());

        let reopened = Workspace::open(&selector).unwrap();
        assert_eq!(reopened.kind, WorkspaceKind::Token);

        // Wrong token: directory differs, so the workspace is simply absent.
        let err = Workspace::open(&Selector::Token("wrong".into())).unwrap_err();
        assert!(matches!(err, Error::WorkspaceNotInitialized(_)));

        reopened.destroy().unwrap();
        let err = Workspace::open(&selector).unwrap_err();
        assert!(matches!(err, Error::WorkspaceNotInitialized(_)));
    }

    #[test]
    fn list_memory_files_scopes_to_long_memory_and_memory_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let _guard = scoped_data_dir(&tmp);

        let ws = Workspace::init(&Selector::Public).unwrap();
        std::fs::write(ws.memory_dir().join("2026-01-01.md"), "kiwi\n").unwrap();
        std::fs::create_dir_all(ws.memory_dir().join("nested")).unwrap();
        std::fs::write(ws.memory_dir().join("nested/deep.md"), "deep\n").unwrap();
        // Not indexed: stray file at the workspace root and non-md files.
        std::fs::write(ws.root().join("notes.md"), "SHOULD_NOT_BE_INDEXED\n").unwrap();
        std::fs::write(ws.memory_dir().join("raw.txt"), "nope\n").unwrap();

        let files = ws.list_memory_files().unwrap();
        let paths: Vec<&str> = files.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec!["MEMORY.md", "memory/2026-01-01.md", "memory/nested/deep.md"]
        );
    }
}
