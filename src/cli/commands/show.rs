//! show command - Dump a branch's recorded state as JSON

use anyhow::{Context as _, Result};
use serde_json::json;

use super::Session;
use crate::cli::Context;
use crate::forge::ForgeRegistry;
use crate::state::{LookupResponse, StateError};

pub fn show(ctx: &Context, branch: &str) -> Result<()> {
    let session = Session::open(ctx)?;
    let store = session.store()?;

    let found = match store.lookup_branch(branch) {
        Ok(found) => found,
        Err(StateError::NotExist) => anyhow::bail!("Branch '{branch}' is not tracked"),
        Err(err) => return Err(err).context("Failed to look up branch"),
    };

    let doc = render(branch, &found, &ForgeRegistry::with_builtin());
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

/// JSON view of a branch. The change is annotated with whether its forge is
/// one this build knows about.
fn render(name: &str, branch: &LookupResponse, forges: &ForgeRegistry) -> serde_json::Value {
    let change = branch.change.as_ref().map(|change| {
        json!({
            "forge": change.forge,
            "known_forge": forges.lookup(&change.forge).is_some(),
            "payload": change.payload,
        })
    });

    json!({
        "name": name,
        "base": branch.base,
        "base_hash": branch.base_hash,
        "upstream": branch.upstream_branch,
        "change": change,
        "merged": branch.merged_downstack,
    })
}
