#![allow(dead_code)]

use mem_cli::config::Settings;
use mem_cli::workspace::{Workspace, WorkspaceKind};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Serialize tests that touch process-global environment variables.
pub fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Environment guard: sets variables on construction, removes them on drop,
/// and holds the env lock for its whole lifetime.
pub struct EnvGuard {
    keys: Vec<String>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    pub fn set(vars: &[(&str, &str)]) -> Self {
        let lock = env_lock();
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        Self {
            keys: vars.iter().map(|(key, _)| key.to_string()).collect(),
            _lock: lock,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in &self.keys {
            std::env::remove_var(key);
        }
    }
}

/// A bare workspace rooted at a temp directory, bypassing the registry.
pub fn bare_workspace(root: &Path) -> Workspace {
    let ws = Workspace::with_root(root, WorkspaceKind::Public);
    std::fs::create_dir_all(ws.memory_dir()).unwrap();
    ws
}

/// Validated default settings.
pub fn default_settings() -> Settings {
    let mut settings = Settings::default();
    settings.validate().unwrap();
    settings
}

/// Settings with small chunks so short fixtures produce several of them.
pub fn small_chunk_settings(tokens: usize, overlap: usize) -> Settings {
    let mut settings = Settings::default();
    settings.chunking.tokens = tokens;
    settings.chunking.overlap = overlap;
    settings.chunking.chars_per_token = 4;
    settings.chunking.min_chars = 32;
    settings.validate().unwrap();
    settings
}

/// Write a file under the workspace root, creating parent directories.
pub fn write_file(ws: &Workspace, rel: &str, content: &str) {
    let path = ws.root().join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}
