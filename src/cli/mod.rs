//! cli
//!
//! Command-line interface layer for spindle.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Install logging
//! - Delegate to command handlers
//!
//! # Architecture
//!
//! The CLI layer is thin. Handlers open the repository, build a
//! [`crate::state::Store`] over the git-backed storage and call into it.
//! All graph edits go through a [`crate::state::BranchTx`].

pub mod args;
pub mod commands;

pub use args::Cli;

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Flags shared by every command.
///
/// `--debug` only affects logging and is consumed before dispatch.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Directory to run in (default: current directory)
    pub cwd: Option<PathBuf>,
    /// Suppress informational output on stdout
    pub quiet: bool,
}

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.debug, cli.quiet);

    let ctx = Context::from(&cli);
    commands::dispatch(cli.command, &ctx)
}

impl From<&Cli> for Context {
    fn from(cli: &Cli) -> Self {
        Self {
            cwd: cli.cwd.clone(),
            quiet: cli.quiet,
        }
    }
}

/// Send `tracing` events to stderr.
///
/// `RUST_LOG` takes precedence over the flags.
fn init_logging(debug: bool, quiet: bool) {
    let level = if debug {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("spindle={level}")));

    // Fails only if a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}
