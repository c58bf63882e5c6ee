//! state
//!
//! The persistent state of a spindle repository.
//!
//! # Architecture
//!
//! [`Store`] sits on a [`Db`] and gives the key space its meaning:
//!
//! | Key                 | Document                                   |
//! |---------------------|--------------------------------------------|
//! | `repo`              | trunk and remote ([`RepoInfo`])            |
//! | `version`           | layout version; absent means 1             |
//! | `branches/<name>`   | one tracked branch ([`BranchState`])       |
//! | `prepared/<name>`   | change subject/body saved before submit    |
//! | `rebase-continue`   | FIFO of commands to resume after a rebase  |
//! | `templates`         | cached forge change templates              |
//!
//! Reads go straight to storage. Changes to the branch graph go through a
//! [`BranchTx`], which validates every edit against the graph as the
//! transaction sees it and commits all of them in one atomic update.
//!
//! # Invariants
//!
//! - The trunk is never a tracked branch
//! - Every tracked branch is based on the trunk or on another tracked branch
//! - The base relation has no cycles
//!
//! # Example
//!
//! ```ignore
//! use spindle::state::{InitStoreRequest, Store, UpsertRequest};
//!
//! let store = Store::init(db, InitStoreRequest::new("main"))?;
//!
//! let mut tx = store.begin_branch_tx();
//! tx.upsert(UpsertRequest::new("feat1").base("main"))?;
//! tx.commit("add feat1")?;
//!
//! assert_eq!(store.lookup_branch("feat1")?.base, "main");
//! ```

mod branch;
mod continuation;
mod prepared;
mod repo;
mod template;
mod tx;
mod version;

use thiserror::Error;
use tracing::debug;

use crate::core::types::{BranchName, TypeError};
use crate::storage::{Db, SetRequest, StorageError, UpdateRequest};

pub use branch::{
    BaseState, BranchState, ChangeMetadata, LookupResponse, UpstreamState,
};
pub use continuation::Continuation;
pub use prepared::PreparedBranch;
pub use repo::RepoInfo;
pub use template::CachedTemplate;
pub use tx::{BranchTx, FieldUpdate, UpsertRequest};
pub use version::Version;

/// Errors from state operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// The requested record is not in the store. Expected, not a fault.
    #[error("does not exist in store")]
    NotExist,

    /// The repository has never been initialized.
    #[error("store not initialized")]
    Uninitialized,

    /// The operation targets the trunk branch.
    #[error("trunk branch is not allowed")]
    Trunk,

    #[error("branch name is required")]
    NameRequired,

    #[error("invalid branch name {name:?}: {reason}")]
    InvalidBranchName { name: String, reason: String },

    #[error("new branch must have a base")]
    MissingBase,

    /// A base branch is neither the trunk nor tracked.
    #[error("branch {name} is not tracked")]
    Untracked { name: String },

    /// The edit would close a loop in the base relation.
    ///
    /// `path` starts and ends with the branch being edited.
    #[error("would create a cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// The branch is the base of other branches.
    #[error("branch {name} is needed by {}", .dependents.join(", "))]
    NeededBy {
        name: String,
        dependents: Vec<String>,
    },

    /// One name is a path prefix of the other, as `feat` and `feat/x` are.
    /// Git cannot hold both as branches, and the store cannot hold both.
    #[error("branch {name} conflicts with tracked branch {other}")]
    NameConflict { name: String, other: String },

    #[error("branch {name}: change forge is required when change metadata is set")]
    MissingForge { name: String },

    #[error("trunk branch ({trunk:?}) is tracked; use --reset to clear")]
    TrunkTracked { trunk: String },

    #[error("trunk branch name is required")]
    TrunkRequired,

    /// Persisted state violates an invariant.
    #[error("corrupt state: {0}")]
    Corrupt(String),

    /// The store uses a layout newer than this build understands.
    #[error("expected store version <= {want}, got {got}")]
    VersionMismatch { want: Version, got: Version },

    /// The caller broke an API contract.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for StateError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotExist => StateError::NotExist,
            other => StateError::Storage(other),
        }
    }
}

/// Validate a caller-supplied branch name.
pub(crate) fn check_branch_name(name: &str) -> Result<BranchName, StateError> {
    if name.trim().is_empty() {
        return Err(StateError::NameRequired);
    }
    BranchName::new(name).map_err(|err| match err {
        TypeError::InvalidBranchName(reason)
        | TypeError::InvalidOid(reason)
        | TypeError::InvalidRefName(reason) => StateError::InvalidBranchName {
            name: name.to_string(),
            reason,
        },
    })
}

/// Request to initialize the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitStoreRequest {
    /// Trunk branch, e.g. `main`.
    pub trunk: String,
    /// Remote to push to and pull from. `None` or empty means no remote.
    pub remote: Option<String>,
    /// Discard all existing state first.
    pub reset: bool,
}

impl InitStoreRequest {
    pub fn new(trunk: impl Into<String>) -> Self {
        Self {
            trunk: trunk.into(),
            ..Default::default()
        }
    }

    pub fn remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }
}

/// The spindle state store for one repository.
///
/// Holds the repository's trunk and remote as read at open time. Everything
/// else is read from storage on demand.
#[derive(Debug)]
pub struct Store {
    db: Db,
    trunk: String,
    remote: Option<String>,
}

impl Store {
    /// Initialize the store, or re-initialize an existing one.
    ///
    /// Re-initializing keeps tracked branches. If the trunk changes, every
    /// branch based on the old trunk is moved onto the new one. With
    /// `reset`, all existing state is discarded first.
    ///
    /// # Errors
    ///
    /// - [`StateError::TrunkRequired`] if the trunk is blank
    /// - [`StateError::TrunkTracked`] if the new trunk is a tracked branch
    /// - [`StateError::VersionMismatch`] if the existing layout is too new
    pub fn init(db: Db, req: InitStoreRequest) -> Result<Self, StateError> {
        if req.trunk.trim().is_empty() {
            return Err(StateError::TrunkRequired);
        }
        let trunk = check_branch_name(&req.trunk)?.into_string();
        let remote = req.remote.filter(|remote| !remote.is_empty());

        let store = Store { db, trunk, remote };

        match store.db.get::<RepoInfo>(repo::REPO_KEY) {
            Ok(old) if !req.reset => {
                version::check_version(&store.db)?;

                match store.lookup_branch_state(&store.trunk) {
                    Ok(_) => {
                        return Err(StateError::TrunkTracked {
                            trunk: store.trunk.clone(),
                        })
                    }
                    Err(StateError::NotExist) => {}
                    Err(err) => return Err(err),
                }

                if old.trunk != store.trunk {
                    store.transfer_trunk(&old.trunk)?;
                }
            }
            Ok(_) => store.reset()?,
            Err(StorageError::NotExist) => {}
            Err(_) if req.reset => store.reset()?,
            Err(err) => return Err(err.into()),
        }

        let info = RepoInfo {
            trunk: store.trunk.clone(),
            remote: store.remote.clone().unwrap_or_default(),
        };
        store.db.update(UpdateRequest {
            sets: vec![
                SetRequest::new(repo::REPO_KEY, &info)?,
                SetRequest::new(version::VERSION_KEY, &Version::LATEST)?,
            ],
            deletes: Vec::new(),
            message: "initialize store".to_string(),
        })?;
        debug!(trunk = %store.trunk, remote = ?store.remote, "store initialized");

        Ok(store)
    }

    /// Open an initialized store.
    ///
    /// # Errors
    ///
    /// - [`StateError::Uninitialized`] if the store was never initialized
    /// - [`StateError::Corrupt`] if the recorded trunk is blank
    /// - [`StateError::VersionMismatch`] if the layout is too new
    pub fn open(db: Db) -> Result<Self, StateError> {
        let info: RepoInfo = match db.get(repo::REPO_KEY) {
            Ok(info) => info,
            Err(StorageError::NotExist) => return Err(StateError::Uninitialized),
            Err(err) => return Err(err.into()),
        };
        info.validate()?;
        version::check_version(&db)?;

        Ok(Store {
            db,
            trunk: info.trunk,
            remote: Some(info.remote).filter(|remote| !remote.is_empty()),
        })
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    fn reset(&self) -> Result<(), StateError> {
        self.db.clear("reset store")?;
        debug!("store reset");
        Ok(())
    }

    /// Move every branch based on `old_trunk` onto the current trunk.
    ///
    /// The old trunk is untracked by definition, so this bypasses the
    /// validation a [`BranchTx`] would apply.
    fn transfer_trunk(&self, old_trunk: &str) -> Result<(), StateError> {
        let mut sets = Vec::new();
        for name in self.db.keys(branch::BRANCHES_DIR)? {
            let mut state = self.lookup_branch_state(&name)?;
            if state.base.name == old_trunk {
                state.base.name = self.trunk.clone();
                sets.push(SetRequest::new(branch::branch_key(&name), &state)?);
            }
        }

        if sets.is_empty() {
            return Ok(());
        }

        let moved = sets.len();
        self.db.update(UpdateRequest {
            sets,
            deletes: Vec::new(),
            message: format!("update trunk branch from {old_trunk:?} to {:?}", self.trunk),
        })?;
        debug!(from = old_trunk, to = %self.trunk, moved, "moved branches to new trunk");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use std::sync::Arc;

    fn memory() -> (Arc<MemoryBackend>, Db) {
        let backend = Arc::new(MemoryBackend::new());
        let db = Db::new(backend.clone());
        (backend, db)
    }

    mod init {
        use super::*;

        #[test]
        fn fresh_store_records_trunk_and_version() {
            let (backend, db) = memory();
            let store = Store::init(db.clone(), InitStoreRequest::new("main").remote("origin")).unwrap();

            assert_eq!(store.trunk(), "main");
            assert_eq!(store.remote().unwrap(), "origin");
            assert_eq!(db.get::<u32>("version").unwrap(), 1);
            // Repo info and version land together.
            assert_eq!(backend.update_count(), 1);
        }

        #[test]
        fn blank_trunk_rejected() {
            let (_, db) = memory();
            let err = Store::init(db, InitStoreRequest::new("  ")).unwrap_err();
            assert!(matches!(err, StateError::TrunkRequired));
        }

        #[test]
        fn empty_remote_means_none() {
            let (_, db) = memory();
            let store = Store::init(db, InitStoreRequest::new("main").remote("")).unwrap();
            assert!(matches!(store.remote(), Err(StateError::NotExist)));
        }

        #[test]
        fn reinit_keeps_branches() {
            let (_, db) = memory();
            let store = Store::init(db.clone(), InitStoreRequest::new("main")).unwrap();
            let mut tx = store.begin_branch_tx();
            tx.upsert(UpsertRequest::new("feat").base("main")).unwrap();
            tx.commit("add feat").unwrap();

            let store = Store::init(db, InitStoreRequest::new("main")).unwrap();
            assert_eq!(store.list_branches().unwrap(), vec!["feat"]);
        }

        #[test]
        fn reset_discards_branches() {
            let (_, db) = memory();
            let store = Store::init(db.clone(), InitStoreRequest::new("main")).unwrap();
            let mut tx = store.begin_branch_tx();
            tx.upsert(UpsertRequest::new("feat").base("main")).unwrap();
            tx.commit("add feat").unwrap();

            let store = Store::init(db, InitStoreRequest::new("main").reset(true)).unwrap();
            assert!(store.list_branches().unwrap().is_empty());
        }

        #[test]
        fn tracked_trunk_rejected() {
            let (_, db) = memory();
            let store = Store::init(db.clone(), InitStoreRequest::new("main")).unwrap();
            let mut tx = store.begin_branch_tx();
            tx.upsert(UpsertRequest::new("develop").base("main")).unwrap();
            tx.commit("add develop").unwrap();

            let err = Store::init(db, InitStoreRequest::new("develop")).unwrap_err();
            assert!(matches!(err, StateError::TrunkTracked { ref trunk } if trunk == "develop"));
            assert!(err.to_string().contains("--reset"));
        }

        #[test]
        fn trunk_change_moves_direct_children() {
            let (_, db) = memory();
            let store = Store::init(db.clone(), InitStoreRequest::new("main")).unwrap();
            let mut tx = store.begin_branch_tx();
            tx.upsert(UpsertRequest::new("a").base("main")).unwrap();
            tx.upsert(UpsertRequest::new("b").base("a")).unwrap();
            tx.commit("seed").unwrap();

            let store = Store::init(db, InitStoreRequest::new("trunk")).unwrap();
            assert_eq!(store.trunk(), "trunk");
            assert_eq!(store.lookup_branch("a").unwrap().base, "trunk");
            assert_eq!(store.lookup_branch("b").unwrap().base, "a");
        }

        #[test]
        fn newer_layout_rejected_without_reset() {
            let (backend, db) = memory();
            Store::init(db.clone(), InitStoreRequest::new("main")).unwrap();
            backend.insert_raw("version", b"42\n");

            let err = Store::init(db.clone(), InitStoreRequest::new("main")).unwrap_err();
            assert_eq!(err.to_string(), "expected store version <= 1, got 42");

            Store::init(db.clone(), InitStoreRequest::new("main").reset(true)).unwrap();
            assert_eq!(db.get::<u32>("version").unwrap(), 1);
        }
    }

    mod open {
        use super::*;

        #[test]
        fn uninitialized() {
            let (_, db) = memory();
            assert!(matches!(Store::open(db), Err(StateError::Uninitialized)));
        }

        #[test]
        fn blank_trunk_is_corrupt() {
            let (backend, db) = memory();
            backend.insert_raw("repo", br#"{"trunk": "", "remote": ""}"#);
            assert!(matches!(Store::open(db), Err(StateError::Corrupt(_))));
        }

        #[test]
        fn missing_version_is_version_one() {
            let (backend, db) = memory();
            backend.insert_raw("repo", br#"{"trunk": "main", "remote": "origin"}"#);
            let store = Store::open(db).unwrap();
            assert_eq!(store.trunk(), "main");
            assert_eq!(store.version().unwrap(), Version::ONE);
        }

        #[test]
        fn newer_version_rejected() {
            let (backend, db) = memory();
            backend.insert_raw("repo", br#"{"trunk": "main", "remote": ""}"#);
            backend.insert_raw("version", b"2");
            match Store::open(db) {
                Err(StateError::VersionMismatch { want, got }) => {
                    assert_eq!(want, Version::ONE);
                    assert_eq!(got, Version(2));
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[test]
    fn error_messages() {
        let cycle = StateError::Cycle {
            path: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(cycle.to_string(), "would create a cycle: A -> B -> A");

        let needed = StateError::NeededBy {
            name: "A".into(),
            dependents: vec!["B".into(), "C".into()],
        };
        assert_eq!(needed.to_string(), "branch A is needed by B, C");
    }
}
