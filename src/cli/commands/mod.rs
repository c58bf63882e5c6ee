//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Opens a [`Session`] for the repository
//! 2. Opens (or initializes) the [`Store`] through it
//! 3. Formats and displays output
//!
//! Handlers never touch the storage ref directly.

mod branches;
mod info;
mod init;
mod show;
mod track;
mod untrack;

pub use branches::branches;
pub use info::info;
pub use init::init;
pub use show::show;
pub use track::track;
pub use untrack::untrack;

use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::args::Command;
use super::Context;
use crate::core::config::Config;
use crate::git::Git;
use crate::state::{StateError, Store};
use crate::storage::{Db, GitBackend};

/// Dispatch a parsed command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Init {
            trunk,
            remote,
            reset,
        } => init(ctx, trunk.as_deref(), remote.as_deref(), reset),
        Command::Info => info(ctx),
        Command::Branches => branches(ctx),
        Command::Show { branch } => show(ctx, &branch),
        Command::Track { branch, base } => track(ctx, &branch, &base),
        Command::Untrack { branch } => untrack(ctx, &branch),
    }
}

/// A repository opened for one command.
pub struct Session {
    pub config: Config,
    pub db: Db,
    /// Branch checked out when the session was opened.
    pub head_branch: Option<String>,
}

impl Session {
    /// Discover the repository from the context's directory and load its
    /// configuration.
    pub fn open(ctx: &Context) -> Result<Self> {
        let cwd = match &ctx.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to determine current directory")?,
        };
        let git = Git::open(&cwd).context("Failed to open repository")?;
        let config =
            Config::load(Some(git.git_dir())).context("Failed to load configuration")?;
        let head_branch = git.head_branch();

        let backend = GitBackend::new(git, config.git_backend_config()?);
        Ok(Self {
            config,
            db: Db::new(Arc::new(backend)),
            head_branch,
        })
    }

    /// Open the store, pointing at `spindle init` if there is none.
    pub fn store(&self) -> Result<Store> {
        match Store::open(self.db.clone()) {
            Ok(store) => Ok(store),
            Err(StateError::Uninitialized) => {
                anyhow::bail!("spindle is not initialized in this repository; run `spindle init`")
            }
            Err(err) => Err(err).context("Failed to open store"),
        }
    }
}
