//! track command - Track a branch on top of a base

use anyhow::{Context as _, Result};

use super::Session;
use crate::cli::Context;
use crate::state::UpsertRequest;

/// Track `branch` on `base`, or move an already tracked branch onto `base`.
///
/// The base must be the trunk or a tracked branch, and the move must not
/// create a cycle.
pub fn track(ctx: &Context, branch: &str, base: &str) -> Result<()> {
    let session = Session::open(ctx)?;
    let store = session.store()?;

    let mut tx = store.begin_branch_tx();
    tx.upsert(UpsertRequest::new(branch).base(base))
        .with_context(|| format!("Failed to track '{branch}'"))?;
    tx.commit(&format!("track {branch} on {base}"))
        .context("Failed to save branch state")?;

    if !ctx.quiet {
        println!("Tracking '{branch}' on '{base}'");
    }
    Ok(())
}
