//! untrack command - Stop tracking a branch

use anyhow::{Context as _, Result};

use super::Session;
use crate::cli::Context;

/// Stop tracking `branch`. Fails if another tracked branch is based on it.
pub fn untrack(ctx: &Context, branch: &str) -> Result<()> {
    let session = Session::open(ctx)?;
    let store = session.store()?;

    let mut tx = store.begin_branch_tx();
    tx.delete(branch)
        .with_context(|| format!("Failed to untrack '{branch}'"))?;
    tx.commit(&format!("untrack {branch}"))
        .context("Failed to save branch state")?;

    if !ctx.quiet {
        println!("Untracked '{branch}'");
    }
    Ok(())
}
