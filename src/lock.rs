//! Cross-process advisory file lock.
//!
//! Built on exclusive file creation: the lock file holds a JSON
//! `{pid, createdAt}` payload so waiters can recover from dead owners. A
//! malformed payload older than a short grace period is treated as stale —
//! the grace keeps in-flight writers from being mistaken for dead ones.
//! Advisory across cooperating processes only.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default acquisition deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const BACKOFF_CAP: Duration = Duration::from_millis(250);
/// Age below which a malformed lock file is assumed to be mid-write.
const MALFORMED_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockPayload {
    pid: u32,
    created_at: i64,
}

/// A held lock. Releases (closes and unlinks) on [`FileLock::release`] or
/// on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl FileLock {
    /// Explicitly release the lock.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.file.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Acquire the lock at `path`, waiting up to [`DEFAULT_TIMEOUT`].
pub fn acquire(path: impl AsRef<Path>) -> Result<FileLock> {
    acquire_with_timeout(path, DEFAULT_TIMEOUT)
}

/// Acquire the lock at `path`, waiting up to `timeout`.
pub fn acquire_with_timeout(path: impl AsRef<Path>, timeout: Duration) -> Result<FileLock> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let start = Instant::now();
    let mut backoff = POLL_INTERVAL;

    loop {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let payload = LockPayload {
                    pid: std::process::id(),
                    created_at: crate::index::now_ms(),
                };
                file.write_all(serde_json::to_string(&payload)?.as_bytes())?;
                file.flush()?;
                return Ok(FileLock {
                    path: path.to_path_buf(),
                    file: Some(file),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if try_clear_stale(path) {
                    continue;
                }
                if start.elapsed() >= timeout {
                    return Err(Error::LockTimeout {
                        path: path.to_path_buf(),
                        waited_ms: start.elapsed().as_millis() as u64,
                    });
                }
                std::thread::sleep(backoff.min(BACKOFF_CAP));
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Poll until the lock at `path` is released (or its owner is dead),
/// without acquiring it.
pub fn wait_for_release(path: impl AsRef<Path>, timeout: Duration) -> Result<()> {
    let path = path.as_ref();
    let start = Instant::now();
    loop {
        if !path.exists() || lock_is_stale(path) {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(Error::LockTimeout {
                path: path.to_path_buf(),
                waited_ms: start.elapsed().as_millis() as u64,
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Remove the lock file if its owner is provably gone. Returns true when
/// the caller should retry acquisition immediately.
fn try_clear_stale(path: &Path) -> bool {
    if !lock_is_stale(path) {
        return false;
    }
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => e.kind() == std::io::ErrorKind::NotFound,
    }
}

fn lock_is_stale(path: &Path) -> bool {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        // Racing with a release; let the acquire loop retry.
        Err(_) => return false,
    };

    match serde_json::from_str::<LockPayload>(&raw) {
        Ok(payload) => !pid_alive(payload.pid),
        Err(_) => file_age(path) >= MALFORMED_GRACE,
    }
}

fn file_age(path: &Path) -> Duration {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .unwrap_or(Duration::ZERO)
}

/// Zero-signal liveness probe: "no such process" means dead, "permission
/// denied" counts as alive.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    !matches!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(libc::ESRCH)
    )
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}
