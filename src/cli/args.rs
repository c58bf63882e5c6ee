//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `-C <path>` / `--cwd <path>`: Run as if in that directory
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Spindle - inspect and edit the stacked-branch state of a repository
#[derive(Parser, Debug)]
#[command(name = "spindle")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run as if spindle was started in this directory
    #[arg(short = 'C', long = "cwd", global = true, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub debug: bool,

    /// Minimal output; only errors are logged
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize the store, or change its trunk and remote
    #[command(after_help = "\
The trunk defaults to the repo config's `trunk`, then the current branch.
Re-running init keeps tracked branches; branches on the old trunk move to
the new one. Use --reset to start over.")]
    Init {
        /// Trunk branch
        #[arg(long)]
        trunk: Option<String>,

        /// Remote to push to and pull from
        #[arg(long)]
        remote: Option<String>,

        /// Discard all existing state first
        #[arg(long)]
        reset: bool,
    },

    /// Show the repository's trunk, remote and store location
    Info,

    /// List tracked branches and their bases
    #[command(alias = "ls")]
    Branches,

    /// Show everything recorded about a branch, as JSON
    Show {
        /// Branch to show
        branch: String,
    },

    /// Start tracking a branch, or move it onto a new base
    Track {
        /// Branch to track
        branch: String,

        /// Branch it is stacked on
        #[arg(long, short)]
        base: String,
    },

    /// Stop tracking a branch
    Untrack {
        /// Branch to untrack
        branch: String,
    },
}
