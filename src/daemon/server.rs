//! Daemon serve loop.
//!
//! Accepts newline-framed JSON requests on a Unix domain socket. `run`
//! requests are serialized through a single worker task, so at most one
//! command executes at a time — the embedding model's compute stream stays
//! sequential and the shared index store is never touched concurrently.
//! An idle timer, re-armed on every connection, shuts the daemon down when
//! no work is in flight.

use super::{build_version, Request, Response, PROTOCOL_VERSION};
use crate::cli;
use crate::embedding;
use crate::error::{Error, Result};
use crate::index::now_ms;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, Notify};

struct RunJob {
    argv: Vec<String>,
    stdin: Option<String>,
    reply: oneshot::Sender<Response>,
}

struct DaemonState {
    started_at: i64,
    in_flight: AtomicUsize,
    run_queue: mpsc::UnboundedSender<RunJob>,
    shutdown: Notify,
}

fn idle_window() -> Duration {
    let ms = std::env::var("MEM_CLI_DAEMON_IDLE_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or_else(|| crate::config::DaemonSettings::default().idle_ms);
    Duration::from_millis(ms.max(100))
}

/// Run the daemon until shutdown is requested or the idle window elapses
/// with no work in flight. Removes the socket (and its directory, when
/// empty) on the way out.
pub async fn serve() -> Result<()> {
    let dir = super::socket_dir();
    std::fs::create_dir_all(&dir)?;
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;

    let socket = super::socket_path();
    if socket.exists() {
        // A previous daemon died without cleanup; the start lock held by
        // our spawner guarantees no live daemon owns this file.
        std::fs::remove_file(&socket)?;
    }

    let listener = UnixListener::bind(&socket)
        .map_err(|e| Error::Daemon(format!("failed to bind {}: {e}", socket.display())))?;
    std::fs::set_permissions(&socket, std::fs::Permissions::from_mode(0o600))?;

    append_start_log_entry()?;
    tracing::info!(socket = %socket.display(), pid = std::process::id(), "daemon listening");

    let (run_tx, run_rx) = mpsc::unbounded_channel::<RunJob>();
    let state = Arc::new(DaemonState {
        started_at: now_ms(),
        in_flight: AtomicUsize::new(0),
        run_queue: run_tx,
        shutdown: Notify::new(),
    });

    tokio::spawn(run_worker(run_rx));

    let idle = idle_window();
    let mut deadline = tokio::time::Instant::now() + idle;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        deadline = tokio::time::Instant::now() + idle;
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
            _ = state.shutdown.notified() => {
                tracing::info!("shutdown requested");
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {
                if state.in_flight.load(Ordering::SeqCst) == 0 {
                    tracing::info!("idle window elapsed, shutting down");
                    break;
                }
                deadline = tokio::time::Instant::now() + idle;
            }
        }
    }

    drop(listener);
    let _ = std::fs::remove_file(&socket);
    // Fails while daemon.log remains, which is fine.
    let _ = std::fs::remove_dir(&dir);
    Ok(())
}

/// FIFO run executor: one command at a time, in arrival order.
async fn run_worker(mut run_rx: mpsc::UnboundedReceiver<RunJob>) {
    while let Some(job) = run_rx.recv().await {
        let RunJob { argv, stdin, reply } = job;
        let result = tokio::task::spawn_blocking(move || cli::run_command(&argv, stdin)).await;
        let response = match result {
            Ok(run) => Response {
                ok: true,
                exit_code: Some(run.exit_code),
                stdout: Some(run.stdout),
                stderr: Some(run.stderr),
                ..Default::default()
            },
            Err(e) => Response::error(format!("command execution failed: {e}")),
        };
        let _ = reply.send(response);
    }
}

async fn handle_connection(stream: UnixStream, state: Arc<DaemonState>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let (response, shutdown) = dispatch(&line, &state).await;

        let mut framed = serde_json::to_vec(&response)?;
        framed.push(b'\n');
        write_half.write_all(&framed).await?;
        write_half.flush().await?;

        if shutdown {
            // Reply is on the wire; now tear the daemon down.
            state.shutdown.notify_one();
            break;
        }
    }
    Ok(())
}

/// Handle one request line. Returns the response and whether the daemon
/// should exit after sending it.
async fn dispatch(line: &str, state: &Arc<DaemonState>) -> (Response, bool) {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return (Response::error(format!("malformed request: {e}")), false),
    };

    if request.protocol_version() != PROTOCOL_VERSION {
        return (Response::restart_required(), false);
    }
    if let Some(client_version) = request.client_version() {
        if client_version != build_version() {
            return (Response::restart_required(), false);
        }
    }

    match request {
        Request::Ping { .. } => (status_response(state), false),
        Request::Shutdown { .. } => (status_response(state), true),
        Request::Run { argv, stdin, .. } => {
            state.in_flight.fetch_add(1, Ordering::SeqCst);
            let (reply_tx, reply_rx) = oneshot::channel();
            let queued = state.run_queue.send(RunJob {
                argv,
                stdin,
                reply: reply_tx,
            });
            let response = match queued {
                Ok(()) => reply_rx
                    .await
                    .unwrap_or_else(|_| Response::error("run worker dropped the job")),
                Err(_) => Response::error("run queue is closed"),
            };
            state.in_flight.fetch_sub(1, Ordering::SeqCst);
            (response, false)
        }
    }
}

fn status_response(state: &DaemonState) -> Response {
    Response {
        ok: true,
        protocol_version: Some(PROTOCOL_VERSION),
        daemon_version: Some(build_version().to_string()),
        pid: Some(std::process::id()),
        started_at: Some(state.started_at),
        embeddings: Some(embedding::runtime_stats()),
        ..Default::default()
    }
}

fn append_start_log_entry() -> Result<()> {
    let mut log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(super::log_path())?;
    writeln!(
        log,
        "daemon started pid={} version={} at={}",
        std::process::id(),
        build_version(),
        now_ms()
    )?;
    Ok(())
}
