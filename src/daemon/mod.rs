//! Long-lived worker daemon and its wire protocol.
//!
//! The daemon keeps the embedding model warm across CLI invocations and
//! executes forwardable commands in-process, serialized through a FIFO
//! queue. Transport is a local Unix domain socket carrying one JSON object
//! per line in each direction.
//!
//! The socket lives under a short-path temp directory derived from the
//! user's uid and a hash of their home directory, keeping the address
//! stable per user and under `sun_path` length limits.

pub mod client;
#[cfg(unix)]
pub mod server;

use crate::embedding::RuntimeStats;
use crate::index::hash_text;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Monotonically increasing wire protocol version. Any mismatch makes the
/// daemon answer `restartRequired` without executing.
pub const PROTOCOL_VERSION: u32 = 1;

/// Build version baked into both the client and the daemon binary.
pub fn build_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub const SOCKET_FILE: &str = "daemon.sock";
pub const START_LOCK_FILE: &str = "daemon.start.lock";
pub const LOG_FILE: &str = "daemon.log";

/// Directory holding the daemon socket, start lock, and log.
pub fn socket_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MEM_CLI_DAEMON_SOCKET_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    let home_hash = &hash_text(&home.to_string_lossy())[..12];
    std::env::temp_dir().join(format!("mem-cli-{}-{home_hash}", uid()))
}

pub fn socket_path() -> PathBuf {
    socket_dir().join(SOCKET_FILE)
}

pub fn start_lock_path() -> PathBuf {
    socket_dir().join(START_LOCK_FILE)
}

pub fn log_path() -> PathBuf {
    socket_dir().join(LOG_FILE)
}

#[cfg(unix)]
fn uid() -> u32 {
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn uid() -> u32 {
    0
}

/// One request per line. `protocolVersion` and `clientVersion` gate every
/// request type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    Ping {
        protocol_version: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
    },
    Shutdown {
        protocol_version: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
    },
    Run {
        protocol_version: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
        argv: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stdin: Option<String>,
    },
}

impl Request {
    pub fn protocol_version(&self) -> u32 {
        match self {
            Self::Ping { protocol_version, .. }
            | Self::Shutdown { protocol_version, .. }
            | Self::Run { protocol_version, .. } => *protocol_version,
        }
    }

    pub fn client_version(&self) -> Option<&str> {
        match self {
            Self::Ping { client_version, .. }
            | Self::Shutdown { client_version, .. }
            | Self::Run { client_version, .. } => client_version.as_deref(),
        }
    }
}

/// One response per line; fields are populated per request type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemon_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<RuntimeStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn restart_required() -> Self {
        Self {
            ok: false,
            restart_required: Some(true),
            protocol_version: Some(PROTOCOL_VERSION),
            daemon_version: Some(build_version().to_string()),
            ..Default::default()
        }
    }
}
