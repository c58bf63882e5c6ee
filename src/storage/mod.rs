//! storage
//!
//! Backend-agnostic key-value storage.
//!
//! # Architecture
//!
//! Keys form a `/`-separated hierarchy and values are JSON documents. The
//! [`Backend`] trait is the whole contract; [`GitBackend`] persists the key
//! space as git objects under one ref and [`MemoryBackend`] keeps it in a map
//! for tests. Higher layers talk to a [`Db`], which adds typed reads and
//! single-key write helpers on top of whichever backend it wraps.
//!
//! # Invariants
//!
//! - An update is all-or-nothing: readers observe either every set and
//!   delete in the batch or none of them
//! - Values are stored as pretty-printed JSON with a trailing newline
//! - A missing key is [`StorageError::NotExist`], never a fault
//!
//! # Example
//!
//! ```ignore
//! use spindle::storage::{Db, MemoryBackend, SetRequest, UpdateRequest};
//! use std::sync::Arc;
//!
//! let db = Db::new(Arc::new(MemoryBackend::new()));
//! db.update(UpdateRequest {
//!     sets: vec![SetRequest::new("repo", &info)?],
//!     deletes: vec!["branches/old".into()],
//!     message: "rewrite".into(),
//! })?;
//! let info: RepoInfo = db.get("repo")?;
//! ```

mod git;
mod memory;
mod retry;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::git::GitError;

pub use git::{GitBackend, GitBackendConfig, DEFAULT_STORE_REF};
pub use memory::MemoryBackend;
pub use retry::{retry_cas, Attempt, CancelToken, RetryPolicy};

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No value is stored under the key.
    #[error("key does not exist")]
    NotExist,

    /// The stored value could not be decoded.
    #[error("decode {key}: {message}")]
    Decode {
        /// Key whose value failed to decode
        key: String,
        /// Decoder message
        message: String,
    },

    /// A value could not be encoded as JSON.
    #[error("encode {key}: {message}")]
    Encode {
        /// Key being written
        key: String,
        /// Encoder message
        message: String,
    },

    /// A key is blank or not a valid path.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// A key would be both a value and a directory of other keys, as `a`
    /// and `a/b` would.
    #[error("key conflict: {key:?} cannot hold both a value and nested keys")]
    KeyConflict {
        /// The shorter of the two conflicting keys
        key: String,
    },

    /// Every attempt lost the compare-and-swap race.
    #[error("update failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The last compare-and-swap failure
        #[source]
        source: GitError,
    },

    /// The operation was cancelled between attempts.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying git failure.
    #[error(transparent)]
    Git(#[from] GitError),
}

/// A single key to write as part of an update.
#[derive(Debug, Clone, PartialEq)]
pub struct SetRequest {
    pub key: String,
    pub value: serde_json::Value,
}

impl SetRequest {
    /// Serialize `value` for storage under `key`.
    pub fn new<T: Serialize + ?Sized>(key: impl Into<String>, value: &T) -> Result<Self, StorageError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| StorageError::Encode {
            key: key.clone(),
            message: e.to_string(),
        })?;
        Ok(Self { key, value })
    }
}

/// A batch of writes and deletes applied atomically.
///
/// Deletes apply before sets, so one batch may replace `a` with `a/b`.
/// A key never holds a value and nested keys at once; a batch that would
/// leave it so fails with [`StorageError::KeyConflict`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRequest {
    pub sets: Vec<SetRequest>,
    pub deletes: Vec<String>,
    /// Commit message recorded with the change.
    pub message: String,
}

impl UpdateRequest {
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.deletes.is_empty()
    }

    /// Reject blank or malformed keys before anything is written.
    pub(crate) fn validate_keys(&self) -> Result<(), StorageError> {
        let keys = self
            .sets
            .iter()
            .map(|s| s.key.as_str())
            .chain(self.deletes.iter().map(String::as_str));
        for key in keys {
            validate_key(key)?;
        }
        Ok(())
    }
}

/// A key-value store of JSON documents.
///
/// Implementations must be safe to share across threads. Each call observes
/// one consistent snapshot of the key space.
pub trait Backend: Send + Sync {
    /// Raw JSON bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotExist`] if nothing is stored there
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// All keys under `dir`, recursively, relative to `dir`.
    ///
    /// An empty `dir` lists the whole store. A missing directory yields an
    /// empty list.
    fn keys(&self, dir: &str) -> Result<Vec<String>, StorageError>;

    /// Apply a batch of sets and deletes atomically.
    fn update(&self, req: UpdateRequest) -> Result<(), StorageError>;

    /// Remove every key in one step.
    fn clear(&self, message: &str) -> Result<(), StorageError>;
}

/// Typed access to a [`Backend`].
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct Db {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

impl Db {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Read and decode the value under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, StorageError> {
        let raw = self.backend.get(key)?;
        serde_json::from_slice(&raw).map_err(|e| StorageError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    pub fn keys(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        self.backend.keys(dir)
    }

    /// Write a single key.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, message: &str) -> Result<(), StorageError> {
        self.update(UpdateRequest {
            sets: vec![SetRequest::new(key, value)?],
            deletes: Vec::new(),
            message: message.to_string(),
        })
    }

    /// Delete a single key. Deleting a missing key succeeds.
    pub fn delete(&self, key: &str, message: &str) -> Result<(), StorageError> {
        self.update(UpdateRequest {
            sets: Vec::new(),
            deletes: vec![key.to_string()],
            message: message.to_string(),
        })
    }

    pub fn update(&self, req: UpdateRequest) -> Result<(), StorageError> {
        self.backend.update(req)
    }

    pub fn clear(&self, message: &str) -> Result<(), StorageError> {
        self.backend.clear(message)
    }
}

/// Encode a value the way every backend stores it.
pub(crate) fn encode_value(key: &str, value: &serde_json::Value) -> Result<Vec<u8>, StorageError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Encode {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.trim().is_empty()
        || key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
    }

    fn db() -> (Arc<MemoryBackend>, Db) {
        let backend = Arc::new(MemoryBackend::new());
        let db = Db::new(backend.clone());
        (backend, db)
    }

    #[test]
    fn typed_set_and_get() {
        let (_, db) = db();
        db.set("a/b", &Doc { name: "x".into() }, "write").unwrap();
        let doc: Doc = db.get("a/b").unwrap();
        assert_eq!(doc, Doc { name: "x".into() });
    }

    #[test]
    fn missing_key_is_not_exist() {
        let (_, db) = db();
        let err = db.get::<Doc>("nope").unwrap_err();
        assert!(matches!(err, StorageError::NotExist));
    }

    #[test]
    fn undecodable_value_reports_key() {
        let (backend, db) = db();
        backend.insert_raw("doc", b"{\"other\": 1}\n");
        let err = db.get::<Doc>("doc").unwrap_err();
        match err {
            StorageError::Decode { key, .. } => assert_eq!(key, "doc"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn delete_missing_key_succeeds() {
        let (_, db) = db();
        db.delete("ghost", "remove").unwrap();
    }

    #[test]
    fn encoded_values_are_pretty_with_newline() {
        let bytes = encode_value("k", &serde_json::json!({"a": {"b": 1}})).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "{\n  \"a\": {\n    \"b\": 1\n  }\n}\n"
        );
    }

    #[test]
    fn invalid_keys_rejected() {
        for key in ["", "  ", "a//b", "/a", "a/", "../x"] {
            let req = UpdateRequest {
                deletes: vec![key.to_string()],
                ..Default::default()
            };
            assert!(
                matches!(req.validate_keys(), Err(StorageError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }
}
