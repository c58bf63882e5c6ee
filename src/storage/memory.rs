//! storage::memory
//!
//! In-memory [`Backend`] for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{encode_value, Backend, StorageError, UpdateRequest};

/// A [`Backend`] holding every value in an ordered map.
///
/// Updates are atomic under one lock. Updates that would change nothing are
/// not counted, mirroring the git backend skipping empty commits.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<BTreeMap<String, Vec<u8>>>,
    updates: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of updates and clears that changed the store.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Store raw bytes under `key`, bypassing encoding.
    ///
    /// Used to seed fixtures that no well-behaved writer would produce.
    pub fn insert_raw(&self, key: &str, value: &[u8]) {
        self.values().insert(key.to_string(), value.to_vec());
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.values().get(key).cloned().ok_or(StorageError::NotExist)
    }

    fn keys(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let dir = dir.trim_matches('/');
        let values = self.values();
        if dir.is_empty() {
            return Ok(values.keys().cloned().collect());
        }

        let prefix = format!("{dir}/");
        Ok(values
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect())
    }

    fn update(&self, req: UpdateRequest) -> Result<(), StorageError> {
        req.validate_keys()?;
        let mut encoded = Vec::with_capacity(req.sets.len());
        for set in &req.sets {
            encoded.push((set.key.clone(), encode_value(&set.key, &set.value)?));
        }

        let mut values = self.values();
        let mut next = values.clone();
        for key in &req.deletes {
            next.remove(key);
        }
        for (key, value) in encoded {
            next.insert(key, value);
        }
        for set in &req.sets {
            check_conflicts(&next, &set.key)?;
        }

        if next != *values {
            *values = next;
            self.updates.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn clear(&self, _message: &str) -> Result<(), StorageError> {
        self.values().clear();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Reject `key` if it sits below another key or has keys below it, the way
/// a git tree cannot hold a blob and a subtree under one name.
fn check_conflicts(values: &BTreeMap<String, Vec<u8>>, key: &str) -> Result<(), StorageError> {
    let ancestor = key
        .match_indices('/')
        .map(|(i, _)| &key[..i])
        .find(|parent| values.contains_key(*parent));
    if let Some(parent) = ancestor {
        return Err(StorageError::KeyConflict {
            key: parent.to_string(),
        });
    }

    let prefix = format!("{key}/");
    let has_children = values
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(next, _)| next.starts_with(&prefix));
    if has_children {
        return Err(StorageError::KeyConflict {
            key: key.to_string(),
        });
    }
    Ok(())
}
