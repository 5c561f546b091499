use anyhow::Result;
use mem_cli::cli;
use mem_cli::daemon::client::{self, ForwardOutcome};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Log to stderr so stdout stays clean for command output and --json.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();

    // Daemon entry points bypass the command runner entirely.
    if argv.first().map(String::as_str) == Some("__daemon") {
        let code = run_daemon_entry(&argv).await;
        std::process::exit(code);
    }

    // Forwardable commands go through the warm daemon when enabled; any
    // transport failure falls back to running in-process.
    if cli::command_is_forwardable(&argv) && client::forwarding_enabled() {
        if let ForwardOutcome::Forwarded(code) = client::try_forward(&argv).await {
            std::process::exit(code);
        }
    }

    // Commands are synchronous; keep them off the async runtime threads.
    let code = tokio::task::spawn_blocking(move || {
        let stdin = if argv.iter().any(|arg| arg == "--stdin") {
            std::io::read_to_string(std::io::stdin()).ok()
        } else {
            None
        };
        let mut out = std::io::stdout();
        let mut err = std::io::stderr();
        let mut io = cli::CommandIo {
            out: &mut out,
            err: &mut err,
            stdin,
        };
        cli::run_command_with_io(&argv, &mut io)
    })
    .await?;

    std::process::exit(code);
}

async fn run_daemon_entry(argv: &[String]) -> i32 {
    let serve = argv.iter().any(|arg| arg == "--serve");
    let shutdown = argv.iter().any(|arg| arg == "--shutdown");

    if serve {
        #[cfg(unix)]
        {
            return match mem_cli::daemon::server::serve().await {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("error: {e}");
                    1
                }
            };
        }
        #[cfg(not(unix))]
        {
            eprintln!("error: the daemon is only available on Unix platforms");
            return 1;
        }
    }

    if shutdown {
        return if client::request_shutdown().await {
            println!("daemon shutting down");
            0
        } else {
            println!("no daemon running");
            0
        };
    }

    eprintln!("usage: mem-cli __daemon --serve|--shutdown");
    1
}
