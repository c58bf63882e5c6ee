//! branches command - List tracked branches

use anyhow::Result;

use super::Session;
use crate::cli::Context;

pub fn branches(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let store = session.store()?;

    for name in store.list_branches()? {
        let branch = store.lookup_branch(&name)?;
        println!("{name}\t{}", branch.base);
    }
    Ok(())
}
