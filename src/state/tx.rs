//! state::tx
//!
//! Transactional edits to the branch graph.
//!
//! # Architecture
//!
//! A [`BranchTx`] stages upserts and deletes in memory. Every staged edit is
//! validated against the graph as the transaction sees it: committed
//! storage overlaid with the transaction's own pending writes and deletes.
//! Nothing is persisted until [`BranchTx::commit`], which hands every
//! pending change to storage as one atomic update.
//!
//! # Invariants
//!
//! A transaction only ever stages edits that keep the graph a forest rooted
//! at trunk:
//! - a base is the trunk or a branch tracked in the transaction's view
//! - an edit `name -> base` is refused if `base` already reaches `name`
//! - a branch cannot be deleted while other branches are based on it
//!
//! # Concurrency
//!
//! A `BranchTx` is not synchronized. Give each thread its own transaction;
//! independent commits are serialized by the store's compare-and-swap.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{SecondsFormat, Utc};
use tracing::debug;

use super::branch::{branch_key, BranchState, ChangeMetadata, UpstreamState};
use super::{check_branch_name, StateError, Store};
use crate::storage::{SetRequest, UpdateRequest};

/// An update to an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    /// Leave the current value alone.
    #[default]
    Keep,
    /// Remove the current value.
    Clear,
    /// Replace the current value.
    Set(T),
}

/// Request to add or update a tracked branch.
///
/// Fields left at their defaults keep the branch's current values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertRequest {
    pub name: String,

    /// New base. Required when the branch is not yet tracked.
    pub base: Option<String>,

    /// Last known commit of the base. Empty or `None` keeps the current hash.
    pub base_hash: Option<String>,

    /// Published change. A `Set` whose payload is JSON `null` clears it.
    pub change: FieldUpdate<ChangeMetadata>,

    /// Upstream branch. A `Set` of an empty name clears it.
    pub upstream_branch: FieldUpdate<String>,

    /// Merged downstack. A `Set` of an empty list clears it.
    pub merged_downstack: FieldUpdate<Vec<String>>,
}

impl UpsertRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn base_hash(mut self, hash: impl Into<String>) -> Self {
        self.base_hash = Some(hash.into());
        self
    }

    pub fn change(mut self, forge: impl Into<String>, payload: serde_json::Value) -> Self {
        self.change = FieldUpdate::Set(ChangeMetadata::new(forge, payload));
        self
    }

    pub fn clear_change(mut self) -> Self {
        self.change = FieldUpdate::Clear;
        self
    }

    pub fn upstream_branch(mut self, branch: impl Into<String>) -> Self {
        self.upstream_branch = FieldUpdate::Set(branch.into());
        self
    }

    pub fn clear_upstream_branch(mut self) -> Self {
        self.upstream_branch = FieldUpdate::Clear;
        self
    }

    pub fn merged_downstack(mut self, merged: Vec<String>) -> Self {
        self.merged_downstack = FieldUpdate::Set(merged);
        self
    }

    pub fn clear_merged_downstack(mut self) -> Self {
        self.merged_downstack = FieldUpdate::Clear;
        self
    }
}

/// An in-progress change to the branch graph.
///
/// Created with [`Store::begin_branch_tx`]. Pending changes are visible to
/// later operations on the same transaction but to no one else until
/// [`commit`](BranchTx::commit).
#[derive(Debug)]
pub struct BranchTx<'a> {
    store: &'a Store,
    /// Branches read or modified so far. Pending deletes are never cached.
    states: BTreeMap<String, BranchState>,
    sets: BTreeSet<String>,
    dels: BTreeSet<String>,
}

impl Store {
    /// Start a transaction on the branch graph.
    pub fn begin_branch_tx(&self) -> BranchTx<'_> {
        BranchTx {
            store: self,
            states: BTreeMap::new(),
            sets: BTreeSet::new(),
            dels: BTreeSet::new(),
        }
    }
}

impl<'a> BranchTx<'a> {
    /// Add a branch, or update one already tracked.
    ///
    /// # Errors
    ///
    /// - [`StateError::NameRequired`] / [`StateError::InvalidBranchName`]
    /// - [`StateError::Trunk`] if `name` is the trunk
    /// - [`StateError::MissingBase`] if the branch is new and has no base
    /// - [`StateError::NameConflict`] if a new branch would nest under or
    ///   above a tracked branch
    /// - [`StateError::Untracked`] if the base is not tracked
    /// - [`StateError::Cycle`] if the base already stacks on `name`
    /// - [`StateError::MissingForge`] if a change is set without a forge
    pub fn upsert(&mut self, req: UpsertRequest) -> Result<(), StateError> {
        let name = check_branch_name(&req.name)?.into_string();
        if name == self.store.trunk() {
            return Err(StateError::Trunk);
        }

        let base = req.base.filter(|base| !base.is_empty());
        let mut state = match self.state(&name) {
            Ok(state) => state,
            Err(StateError::NotExist) => match &base {
                // Not staged until the rest of the request validates.
                Some(base) => {
                    if let Some(other) = self.conflicting_name(&name)? {
                        return Err(StateError::NameConflict { name, other });
                    }
                    BranchState::new(base.clone())
                }
                None => return Err(StateError::MissingBase),
            },
            Err(err) => return Err(err),
        };

        if let Some(base) = base {
            let base = check_branch_name(&base)?.into_string();
            if base != self.store.trunk() {
                match self.state(&base) {
                    Ok(_) => {}
                    Err(StateError::NotExist) => return Err(StateError::Untracked { name: base }),
                    Err(err) => return Err(err),
                }

                // name -> base is safe only if there is no path from base to name.
                if let Some(path) = self.path(&base, &name)? {
                    return Err(cycle_error(path));
                }
            }
            state.base.name = base;
        }

        if let Some(hash) = req.base_hash.filter(|hash| !hash.is_empty()) {
            state.base.hash = hash;
        }

        match req.change {
            FieldUpdate::Keep => {}
            FieldUpdate::Clear => state.change = None,
            FieldUpdate::Set(change) if change.payload.is_null() => state.change = None,
            FieldUpdate::Set(change) => {
                if change.forge.trim().is_empty() {
                    return Err(StateError::MissingForge { name });
                }
                state.change = Some(change);
            }
        }

        match req.upstream_branch {
            FieldUpdate::Keep => {}
            FieldUpdate::Set(branch) if !branch.is_empty() => {
                state.upstream = Some(UpstreamState { branch });
            }
            FieldUpdate::Set(_) | FieldUpdate::Clear => state.upstream = None,
        }

        match req.merged_downstack {
            FieldUpdate::Keep => {}
            FieldUpdate::Set(merged) => state.merged_downstack = merged,
            FieldUpdate::Clear => state.merged_downstack.clear(),
        }

        self.dels.remove(&name);
        self.sets.insert(name.clone());
        self.states.insert(name, state);
        Ok(())
    }

    /// Stop tracking a branch.
    ///
    /// # Errors
    ///
    /// - [`StateError::Trunk`] if `name` is the trunk
    /// - [`StateError::NotExist`] if the branch is not tracked
    /// - [`StateError::NeededBy`] if other branches are based on it
    pub fn delete(&mut self, name: &str) -> Result<(), StateError> {
        let name = check_branch_name(name)?.into_string();
        if name == self.store.trunk() {
            return Err(StateError::Trunk);
        }

        self.state(&name)?;

        let dependents = self.aboves(&name)?;
        if !dependents.is_empty() {
            return Err(StateError::NeededBy { name, dependents });
        }

        self.sets.remove(&name);
        self.states.remove(&name);
        self.dels.insert(name);
        Ok(())
    }

    /// Persist every pending change in one atomic update.
    ///
    /// Does nothing if there are no pending changes. An empty `message` is
    /// replaced with a timestamped default. On success the transaction is
    /// empty again and may be reused.
    pub fn commit(&mut self, message: &str) -> Result<(), StateError> {
        if self.sets.is_empty() && self.dels.is_empty() {
            return Ok(());
        }

        let mut sets = Vec::with_capacity(self.sets.len());
        for name in &self.sets {
            let state = self.states.get(name).ok_or_else(|| {
                StateError::Corrupt(format!("branch {name:?} is staged without state"))
            })?;
            sets.push(SetRequest::new(branch_key(name), state)?);
        }

        let message = if message.is_empty() {
            format!(
                "update at {}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
            )
        } else {
            message.to_string()
        };

        self.store.db().update(UpdateRequest {
            sets,
            deletes: self.dels.iter().map(|name| branch_key(name)).collect(),
            message,
        })?;
        debug!(sets = self.sets.len(), deletes = self.dels.len(), "branch transaction committed");

        self.sets.clear();
        self.dels.clear();
        self.states.clear();
        Ok(())
    }

    /// Tracked branches as this transaction sees them, sorted by name.
    pub fn branches(&self) -> Result<Vec<String>, StateError> {
        let mut seen: BTreeSet<String> = self.sets.difference(&self.dels).cloned().collect();
        for name in self.store.list_branches()? {
            if !self.dels.contains(&name) {
                seen.insert(name);
            }
        }
        Ok(seen.into_iter().collect())
    }

    /// Look up a branch through the transaction's view, caching the result.
    fn state(&mut self, name: &str) -> Result<BranchState, StateError> {
        if self.dels.contains(name) {
            return Err(StateError::NotExist);
        }
        if let Some(state) = self.states.get(name) {
            return Ok(state.clone());
        }

        let state = self.store.lookup_branch_state(name)?;
        self.states.insert(name.to_string(), state.clone());
        Ok(state)
    }

    /// A tracked branch that `name` would nest under or above, like `feat`
    /// for `feat/x`.
    fn conflicting_name(&self, name: &str) -> Result<Option<String>, StateError> {
        let nested = |outer: &str, inner: &str| {
            inner
                .strip_prefix(outer)
                .is_some_and(|rest| rest.starts_with('/'))
        };
        Ok(self
            .branches()?
            .into_iter()
            .find(|other| nested(other, name) || nested(name, other)))
    }

    /// Branches whose base is `name`, sorted.
    fn aboves(&mut self, name: &str) -> Result<Vec<String>, StateError> {
        let mut aboves = Vec::new();
        for branch in self.branches()? {
            if self.state(&branch)?.base.name == name {
                aboves.push(branch);
            }
        }
        Ok(aboves)
    }

    /// Follow bases from `from` until `to` or the trunk.
    ///
    /// Returns the branches visited from `from` to `to` inclusive, or `None`
    /// if the walk reached the trunk first.
    ///
    /// # Panics
    ///
    /// If a branch is visited twice. Every edit is checked for cycles before
    /// it is staged, so a loop here means the persisted graph is already
    /// corrupt and carrying on would only spread the damage.
    fn path(&mut self, from: &str, to: &str) -> Result<Option<Vec<String>>, StateError> {
        let mut seen = BTreeSet::new();
        let mut path = Vec::new();
        let mut cur = from.to_string();

        while cur != to {
            if cur == self.store.trunk() {
                return Ok(None);
            }

            if !seen.insert(cur.clone()) {
                path.push(cur);
                panic!(
                    "corrupt store: cycle detected in branch graph: {}",
                    path.join(" -> ")
                );
            }

            let state = match self.state(&cur) {
                Ok(state) => state,
                Err(StateError::NotExist) => {
                    return Err(StateError::Corrupt(format!(
                        "branch {:?} is based on untracked branch {cur:?}",
                        path.last().map(String::as_str).unwrap_or(from)
                    )))
                }
                Err(err) => return Err(err),
            };
            if state.base.name.is_empty() {
                return Err(StateError::Corrupt(format!("branch {cur:?} has no base")));
            }

            path.push(cur);
            cur = state.base.name;
        }

        path.push(to.to_string());
        Ok(Some(path))
    }
}

/// Render a base-to-branch path as the loop the edit would close.
///
/// `[base, .., name]` becomes `name -> .. -> base -> name`.
fn cycle_error(mut path: Vec<String>) -> StateError {
    path.reverse();
    if let Some(name) = path.first().cloned() {
        path.push(name);
    }
    StateError::Cycle { path }
}
