//! info command - Show repository-level state

use anyhow::Result;

use super::Session;
use crate::cli::Context;

/// Print the trunk, remote, storage ref and layout version.
pub fn info(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let store = session.store()?;

    println!("Trunk:    {}", store.trunk());
    println!("Remote:   {}", store.remote().unwrap_or("(none)"));
    println!("Ref:      {}", session.config.store_ref());
    println!("Version:  {}", store.version()?);
    println!("Branches: {}", store.list_branches()?.len());
    Ok(())
}
