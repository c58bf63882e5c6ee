//! state::version
//!
//! Layout version of the store.

use serde::{Deserialize, Serialize};

use super::{StateError, Store};
use crate::storage::{Db, StorageError};

pub(crate) const VERSION_KEY: &str = "version";

/// Version of the store's key layout.
///
/// Stored as a bare integer under `version`. Stores written before the
/// marker existed have no such key and are version 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u32);

impl Version {
    pub const ONE: Version = Version(1);

    /// Newest layout this build reads and writes.
    pub const LATEST: Version = Version::ONE;
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) fn load_version(db: &Db) -> Result<Version, StateError> {
    match db.get(VERSION_KEY) {
        Ok(version) => Ok(version),
        Err(StorageError::NotExist) => Ok(Version::ONE),
        Err(err) => Err(err.into()),
    }
}

/// Refuse layouts this build does not understand.
pub(crate) fn check_version(db: &Db) -> Result<(), StateError> {
    let got = load_version(db)?;
    if got == Version::ONE {
        return Ok(());
    }
    Err(StateError::VersionMismatch {
        want: Version::LATEST,
        got,
    })
}

impl Store {
    /// Layout version recorded in the store.
    pub fn version(&self) -> Result<Version, StateError> {
        load_version(self.db())
    }
}
