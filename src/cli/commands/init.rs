//! init command - Initialize or re-initialize the store

use anyhow::{Context as _, Result};

use super::Session;
use crate::cli::Context;
use crate::state::{InitStoreRequest, Store};

/// Initialize the store.
///
/// The trunk is taken from `--trunk`, then the repo config, then the
/// checked-out branch. The remote is taken from `--remote`, then the repo
/// config.
pub fn init(ctx: &Context, trunk: Option<&str>, remote: Option<&str>, reset: bool) -> Result<()> {
    let session = Session::open(ctx)?;

    let trunk = trunk
        .map(str::to_string)
        .or_else(|| session.config.trunk().map(str::to_string))
        .or_else(|| session.head_branch.clone())
        .context("Cannot determine the trunk branch; pass --trunk")?;

    let mut req = InitStoreRequest::new(&trunk).reset(reset);
    if let Some(remote) = remote.or(session.config.remote()) {
        req = req.remote(remote);
    }

    let store = Store::init(session.db.clone(), req).context("Failed to initialize store")?;

    if !ctx.quiet {
        println!("Initialized spindle with trunk '{}'", store.trunk());
        if let Ok(remote) = store.remote() {
            println!("Remote: {remote}");
        }
    }
    Ok(())
}
