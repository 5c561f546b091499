//! Command-line surface.
//!
//! Commands execute through explicit output sinks instead of the process
//! streams, so the daemon can run them in-process and return captured
//! stdout/stderr over the wire. `run_command` is that captured entry point;
//! `run_command_with_io` writes to whatever sinks the caller provides.

pub mod add;
pub mod destroy;
pub mod init;
pub mod reindex;
pub mod search;
pub mod state;

use crate::error::Result;
use crate::workspace::Selector;
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write;

#[derive(Debug, Parser)]
#[command(
    name = "mem-cli",
    version,
    about = "Local agent memory: Markdown workspaces with a vector-search index"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Append a note to memory and index it
    Add {
        /// Where the note goes: a dated file (short) or MEMORY.md (long)
        slot: AddSlot,
        /// The note text (or pass --stdin)
        text: Vec<String>,
        /// Read the note text from stdin
        #[arg(long)]
        stdin: bool,
        #[command(flatten)]
        selector: SelectorArgs,
        #[arg(long)]
        json: bool,
    },
    /// Semantic search over indexed memory
    Search {
        query: Vec<String>,
        /// Maximum number of hits
        #[arg(long)]
        limit: Option<usize>,
        #[command(flatten)]
        selector: SelectorArgs,
        #[arg(long)]
        json: bool,
    },
    /// Bring the index up to date (or rebuild it with --force)
    Reindex {
        /// Reindex every initialized workspace
        #[arg(long)]
        all: bool,
        /// Rebuild from scratch instead of syncing incrementally
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        selector: SelectorArgs,
        #[arg(long)]
        json: bool,
    },
    /// Show workspace and index state
    State {
        #[command(flatten)]
        selector: SelectorArgs,
        #[arg(long)]
        json: bool,
    },
    /// Create a workspace
    Init {
        #[command(flatten)]
        selector: SelectorArgs,
        #[arg(long)]
        json: bool,
    },
    /// Delete a workspace and its index
    Destroy {
        #[command(flatten)]
        selector: SelectorArgs,
        /// Required: destroying a workspace is irreversible
        #[arg(long)]
        confirm: bool,
        #[arg(long)]
        json: bool,
    },
    /// Internal daemon entry points
    #[command(name = "__daemon", hide = true)]
    Daemon {
        /// Run the daemon serve loop
        #[arg(long)]
        serve: bool,
        /// Ask a running daemon to shut down
        #[arg(long)]
        shutdown: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AddSlot {
    /// Dated file under memory/
    Short,
    /// The long-term MEMORY.md file
    Long,
}

/// `--public` / `--token` workspace selection, shared by every workspace
/// command.
#[derive(Debug, Clone, Args)]
pub struct SelectorArgs {
    /// Address the public workspace
    #[arg(long)]
    pub public: bool,
    /// Address the workspace protected by this token
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,
}

impl SelectorArgs {
    pub fn resolve(&self) -> Result<Selector> {
        Selector::from_flags(self.public, self.token.clone())
    }
}

/// Output sinks a command writes through.
pub struct CommandIo<'a> {
    pub out: &'a mut dyn Write,
    pub err: &'a mut dyn Write,
    pub stdin: Option<String>,
}

/// Captured result of an in-process command execution.
#[derive(Debug)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Execute `argv` with captured output (the daemon's entry point).
pub fn run_command(argv: &[String], stdin: Option<String>) -> CommandResult {
    let mut out: Vec<u8> = Vec::new();
    let mut err: Vec<u8> = Vec::new();
    let exit_code = {
        let mut io = CommandIo {
            out: &mut out,
            err: &mut err,
            stdin,
        };
        run_command_with_io(argv, &mut io)
    };
    CommandResult {
        exit_code,
        stdout: String::from_utf8_lossy(&out).into_owned(),
        stderr: String::from_utf8_lossy(&err).into_owned(),
    }
}

/// Execute `argv`, writing through `io`. Returns the exit code.
///
/// Argument-parser outcomes are explicit values here: help and version
/// render to the output sink with exit code 0, parse errors render to the
/// error sink with exit code 1.
pub fn run_command_with_io(argv: &[String], io: &mut CommandIo) -> i32 {
    let cli = match Cli::try_parse_from(std::iter::once("mem-cli".to_string()).chain(argv.iter().cloned())) {
        Ok(cli) => cli,
        Err(e) => {
            let rendered = e.render().to_string();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    let _ = write!(io.out, "{rendered}");
                    0
                }
                _ => {
                    let _ = write!(io.err, "{rendered}");
                    1
                }
            };
        }
    };

    let result = match cli.command {
        Command::Add {
            slot,
            text,
            stdin,
            selector,
            json,
        } => add::run(slot, &text, stdin, &selector, json, io),
        Command::Search {
            query,
            limit,
            selector,
            json,
        } => search::run(&query, limit, &selector, json, io),
        Command::Reindex {
            all,
            force,
            selector,
            json,
        } => reindex::run(all, force, &selector, json, io),
        Command::State { selector, json } => state::run(&selector, json, io),
        Command::Init { selector, json } => init::run(&selector, json, io),
        Command::Destroy {
            selector,
            confirm,
            json,
        } => destroy::run(&selector, confirm, json, io),
        Command::Daemon { .. } => Err(crate::error::Error::InvalidInput(
            "__daemon must be invoked directly, not through the command runner".into(),
        )),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            let _ = writeln!(io.err, "error: {e}");
            1
        }
    }
}

/// Whether the daemon may execute this command on the client's behalf.
/// Workspace lifecycle stays in-process by design.
pub fn command_is_forwardable(argv: &[String]) -> bool {
    matches!(
        argv.first().map(String::as_str),
        Some("add") | Some("search") | Some("reindex")
    )
}
