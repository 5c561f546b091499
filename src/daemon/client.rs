//! Connect-or-spawn daemon client.
//!
//! Forwardable commands try the daemon first: a short ping, then — if no
//! daemon answers — a spawn under the start lock, then a `run` request with
//! a long timeout covering a cold model load. A `restartRequired` answer is
//! recovered once by asking the old daemon to shut down and retrying. Any
//! transport error yields [`ForwardOutcome::NotForwarded`] so the caller
//! runs the command in-process instead.

use super::{build_version, Request, Response, PROTOCOL_VERSION};
use crate::config::env_truthy;

#[derive(Debug)]
pub enum ForwardOutcome {
    /// The daemon executed the command; this is its exit code.
    Forwarded(i32),
    /// Run the command in-process instead.
    NotForwarded,
}

/// Whether forwarding is enabled for this process. The daemon disables it
/// for itself via `MEM_CLI_DAEMON=0` in its own environment.
pub fn forwarding_enabled() -> bool {
    env_truthy("MEM_CLI_DAEMON", true)
}

#[cfg(not(unix))]
pub async fn try_forward(_argv: &[String]) -> ForwardOutcome {
    ForwardOutcome::NotForwarded
}

/// Ask a running daemon to shut down. Returns true if one answered.
#[cfg(not(unix))]
pub async fn request_shutdown() -> bool {
    false
}

#[cfg(unix)]
pub use unix::{request_shutdown, try_forward};

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::error::{Error, Result};
    use crate::lock;
    use std::io::Write as _;
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(750);
    const RUN_TIMEOUT: Duration = Duration::from_secs(600);
    const START_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
    const SPAWN_WAIT: Duration = Duration::from_secs(5);

    pub async fn try_forward(argv: &[String]) -> ForwardOutcome {
        match forward_inner(argv).await {
            Ok(exit_code) => ForwardOutcome::Forwarded(exit_code),
            Err(e) => {
                tracing::debug!(error = %e, "daemon forwarding unavailable");
                ForwardOutcome::NotForwarded
            }
        }
    }

    async fn forward_inner(argv: &[String]) -> Result<i32> {
        let stdin = if argv.iter().any(|arg| arg == "--stdin") {
            let raw = tokio::task::spawn_blocking(|| std::io::read_to_string(std::io::stdin()))
                .await
                .map_err(|e| Error::Daemon(format!("stdin read task failed: {e}")))??;
            Some(raw)
        } else {
            None
        };

        ensure_daemon().await?;

        let request = Request::Run {
            protocol_version: PROTOCOL_VERSION,
            client_version: Some(build_version().to_string()),
            argv: argv.to_vec(),
            stdin,
        };

        let mut response = roundtrip(&request, RUN_TIMEOUT).await?;

        if response.restart_required == Some(true) {
            // A stale daemon from an older build: replace it, retry once.
            let _ = request_shutdown().await;
            wait_for_socket_gone(Duration::from_secs(2)).await;
            ensure_daemon().await?;
            response = roundtrip(&request, RUN_TIMEOUT).await?;
            if response.restart_required == Some(true) {
                return Err(Error::Daemon("daemon version mismatch persists".into()));
            }
        }

        let exit_code = match response.exit_code {
            Some(code) => code,
            None => {
                return Err(Error::Daemon(
                    response
                        .error
                        .unwrap_or_else(|| "daemon returned no exit code".into()),
                ))
            }
        };

        if let Some(stdout) = &response.stdout {
            print!("{stdout}");
            let _ = std::io::stdout().flush();
        }
        if let Some(stderr) = &response.stderr {
            eprint!("{stderr}");
            let _ = std::io::stderr().flush();
        }
        Ok(exit_code)
    }

    /// Ask a running daemon to shut down. Returns true if one answered.
    pub async fn request_shutdown() -> bool {
        let request = Request::Shutdown {
            protocol_version: PROTOCOL_VERSION,
            client_version: Some(build_version().to_string()),
        };
        roundtrip(&request, HANDSHAKE_TIMEOUT).await.is_ok()
    }

    async fn ping() -> Result<Response> {
        let request = Request::Ping {
            protocol_version: PROTOCOL_VERSION,
            client_version: Some(build_version().to_string()),
        };
        roundtrip(&request, HANDSHAKE_TIMEOUT).await
    }

    /// Connect to a live daemon, spawning one under the start lock when
    /// none answers.
    async fn ensure_daemon() -> Result<()> {
        if ping().await.is_ok() {
            return Ok(());
        }

        let start_lock_path = super::super::start_lock_path();
        let start_lock = tokio::task::spawn_blocking(move || {
            lock::acquire_with_timeout(start_lock_path, START_LOCK_TIMEOUT)
        })
        .await
        .map_err(|e| Error::Daemon(format!("start lock task failed: {e}")))??;

        // Another client may have spawned the daemon while we waited.
        if ping().await.is_ok() {
            drop(start_lock);
            return Ok(());
        }

        spawn_daemon()?;

        let deadline = tokio::time::Instant::now() + SPAWN_WAIT;
        loop {
            if ping().await.is_ok() {
                drop(start_lock);
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                drop(start_lock);
                return Err(Error::Daemon("daemon did not become ready".into()));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn spawn_daemon() -> Result<()> {
        let exe = std::env::current_exe()?;
        std::process::Command::new(exe)
            .args(["__daemon", "--serve"])
            .env("MEM_CLI_DAEMON", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Daemon(format!("failed to spawn daemon: {e}")))?;
        tracing::debug!("daemon spawned");
        Ok(())
    }

    async fn wait_for_socket_gone(timeout: Duration) {
        let socket = super::super::socket_path();
        let deadline = tokio::time::Instant::now() + timeout;
        while socket.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn roundtrip(request: &Request, timeout: Duration) -> Result<Response> {
        let exchange = async {
            let mut stream = UnixStream::connect(super::super::socket_path()).await?;
            let mut framed = serde_json::to_vec(request)?;
            framed.push(b'\n');
            stream.write_all(&framed).await?;

            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            if line.is_empty() {
                return Err(Error::Daemon("daemon closed the connection".into()));
            }
            Ok(serde_json::from_str::<Response>(&line)?)
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| Error::Daemon("daemon request timed out".into()))?
    }
}
