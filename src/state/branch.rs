//! state::branch
//!
//! Persisted branch documents and read access to them.
//!
//! # Schema
//!
//! Each tracked branch is one document at `branches/<name>`:
//!
//! ```json
//! {
//!   "base": {"name": "main", "hash": "abc123..."},
//!   "upstream": {"branch": "feat1"},
//!   "change": {"github": {"number": 42}},
//!   "merged": ["#40", "#41"]
//! }
//! ```
//!
//! Only `base` is required. `change` holds exactly one key, the forge ID,
//! mapped to a payload only that forge understands.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use super::{StateError, Store};
use crate::core::types::BranchName;

pub(crate) const BRANCHES_DIR: &str = "branches";

/// Storage key of a branch document.
pub(crate) fn branch_key(name: &str) -> String {
    format!("{BRANCHES_DIR}/{name}")
}

/// The branch a tracked branch is stacked on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseState {
    pub name: String,
    /// Last known commit of the base. May be stale or empty.
    #[serde(default)]
    pub hash: String,
}

/// Remote-tracking branch a tracked branch pushes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamState {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
}

/// A published change, tagged with the forge that owns it.
///
/// Serialized as a single-key object `{"<forge>": <payload>}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeMetadata {
    /// Forge that owns the change, e.g. `github`.
    pub forge: String,
    /// Opaque payload only that forge can interpret.
    pub payload: serde_json::Value,
}

impl ChangeMetadata {
    pub fn new(forge: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            forge: forge.into(),
            payload,
        }
    }
}

impl Serialize for ChangeMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.forge, &self.payload)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChangeMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        if map.len() != 1 {
            let keys: Vec<&String> = map.keys().collect();
            return Err(de::Error::custom(format!(
                "expected 1 forge key, got {}: {:?}",
                keys.len(),
                keys
            )));
        }

        let Some((forge, payload)) = map.into_iter().next() else {
            return Err(de::Error::custom("expected 1 forge key, got 0: []"));
        };
        Ok(ChangeMetadata { forge, payload })
    }
}

/// Persisted state of one tracked branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchState {
    pub base: BaseState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<ChangeMetadata>,

    /// Changes below this branch already merged into trunk, oldest first.
    #[serde(rename = "merged", default, skip_serializing_if = "Vec::is_empty")]
    pub merged_downstack: Vec<String>,
}

impl BranchState {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: BaseState {
                name: base.into(),
                hash: String::new(),
            },
            ..Default::default()
        }
    }
}

/// What the store knows about a tracked branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResponse {
    pub base: String,
    /// Last known commit of the base; empty if never recorded.
    pub base_hash: String,
    pub change: Option<ChangeMetadata>,
    pub upstream_branch: Option<String>,
    /// Changes below this branch already merged into trunk, oldest first.
    pub merged_downstack: Vec<String>,
}

impl From<BranchState> for LookupResponse {
    fn from(state: BranchState) -> Self {
        Self {
            base: state.base.name,
            base_hash: state.base.hash,
            change: state.change,
            upstream_branch: state
                .upstream
                .map(|upstream| upstream.branch)
                .filter(|branch| !branch.is_empty()),
            merged_downstack: state.merged_downstack,
        }
    }
}

impl fmt::Display for LookupResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "base {}", self.base)?;
        if !self.base_hash.is_empty() {
            let short: String = self.base_hash.chars().take(7).collect();
            write!(f, " @ {short}")?;
        }
        Ok(())
    }
}

impl Store {
    /// Look up a tracked branch.
    ///
    /// # Errors
    ///
    /// - [`StateError::NotExist`] if the branch is not tracked. The trunk is
    ///   never tracked, and neither is a name Git would not accept.
    pub fn lookup_branch(&self, name: &str) -> Result<LookupResponse, StateError> {
        if name == self.trunk || BranchName::new(name).is_err() {
            return Err(StateError::NotExist);
        }
        Ok(self.lookup_branch_state(name)?.into())
    }

    /// All tracked branches, sorted by name.
    pub fn list_branches(&self) -> Result<Vec<String>, StateError> {
        let mut branches = self.db().keys(BRANCHES_DIR)?;
        branches.sort();
        Ok(branches)
    }

    /// Read a branch document without the trunk check.
    pub(crate) fn lookup_branch_state(&self, name: &str) -> Result<BranchState, StateError> {
        Ok(self.db().get(&branch_key(name))?)
    }
}
