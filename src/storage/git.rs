//! storage::git
//!
//! Key-value storage inside a git repository.
//!
//! # Architecture
//!
//! The whole key space is one tree. Each key is a path in that tree and each
//! value a blob. The tree is committed under a dedicated ref (not a branch),
//! and every update is a new commit whose parent is the previous state, so
//! the ref's history is the store's changelog.
//!
//! # Concurrency
//!
//! Updates are optimistic. The new commit is swapped into the ref only if the
//! ref still points at the commit the update was computed from; otherwise the
//! update is recomputed from fresh state, up to the configured attempt bound.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::retry::{retry_cas, Attempt, CancelToken, RetryPolicy};
use super::{encode_value, Backend, StorageError, UpdateRequest};
use crate::core::types::{Oid, RefName};
use crate::git::{
    BlobWrite, CommitRequest, EntryKind, Git, GitError, RefCondition, SetRefRequest, Signature,
};

/// Ref the store lives under unless configured otherwise.
pub const DEFAULT_STORE_REF: &str = "refs/spindle/data";

/// Settings for a [`GitBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitBackendConfig {
    /// Ref holding the store's commit history.
    pub refname: RefName,
    /// Author and committer of store commits.
    pub signature: Signature,
    /// Compare-and-swap retry bound.
    pub retry: RetryPolicy,
}

/// A [`Backend`] persisted as commits under a git ref.
pub struct GitBackend {
    git: Mutex<Git>,
    refname: RefName,
    signature: Signature,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl std::fmt::Debug for GitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitBackend")
            .field("refname", &self.refname)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl GitBackend {
    pub fn new(git: Git, config: GitBackendConfig) -> Self {
        Self {
            git: Mutex::new(git),
            refname: config.refname,
            signature: config.signature,
            retry: config.retry,
            cancel: CancelToken::new(),
        }
    }

    /// Observe `token` between update attempts.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn refname(&self) -> &RefName {
        &self.refname
    }

    fn git(&self) -> MutexGuard<'_, Git> {
        self.git.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current commit and its tree, if the store has any history.
    fn head(&self, git: &Git) -> Result<Option<(Oid, Oid)>, GitError> {
        match git.try_resolve_commit(self.refname.as_str())? {
            Some(commit) => {
                let tree = git.commit_tree(&commit)?;
                Ok(Some((commit, tree)))
            }
            None => Ok(None),
        }
    }

    /// Commit `tree` on top of `parent` and swap it into the ref.
    fn commit_and_swap(
        &self,
        git: &Git,
        parent: Option<&Oid>,
        tree: &Oid,
        message: &str,
        condition: RefCondition<'_>,
    ) -> Result<Oid, GitError> {
        let parents: Vec<Oid> = parent.into_iter().cloned().collect();
        let commit = git.commit(&CommitRequest {
            tree,
            parents: &parents,
            author: &self.signature,
            committer: &self.signature,
            message,
        })?;
        git.set_ref(&SetRefRequest {
            refname: &self.refname,
            new: &commit,
            condition,
            message,
        })?;
        Ok(commit)
    }
}

impl Backend for GitBackend {
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let git = self.git();
        let Some((_, tree)) = self.head(&git)? else {
            return Err(StorageError::NotExist);
        };
        match git.entry_at(&tree, key)? {
            Some(entry) if entry.kind == EntryKind::Blob => Ok(git.read_blob(&entry.oid)?),
            _ => Err(StorageError::NotExist),
        }
    }

    fn keys(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let git = self.git();
        let Some((_, root)) = self.head(&git)? else {
            return Ok(Vec::new());
        };

        let dir = dir.trim_matches('/');
        let tree = if dir.is_empty() {
            root
        } else {
            match git.entry_at(&root, dir)? {
                Some(entry) if entry.kind == EntryKind::Tree => entry.oid,
                _ => return Ok(Vec::new()),
            }
        };

        Ok(git
            .list_tree(&tree, true)?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Blob)
            .map(|entry| entry.path)
            .collect())
    }

    fn update(&self, req: UpdateRequest) -> Result<(), StorageError> {
        req.validate_keys()?;
        let git = self.git();

        // Blobs are content-addressed, so they can be written once up front.
        let mut writes: BTreeMap<&str, Oid> = BTreeMap::new();
        for set in &req.sets {
            let blob = git.write_blob(&encode_value(&set.key, &set.value)?)?;
            writes.insert(set.key.as_str(), blob);
        }
        let writes: Vec<BlobWrite> = writes
            .into_iter()
            .map(|(key, oid)| BlobWrite::new(key, oid))
            .collect();

        retry_cas(self.retry, &self.cancel, |attempt| {
            let head = self.head(&git)?;
            let (prev_commit, prev_tree) = match &head {
                Some((commit, tree)) => (Some(commit), tree.clone()),
                None => (None, git.empty_tree()?),
            };

            let tree = git
                .update_tree(Some(&prev_tree), &writes, &req.deletes)
                .map_err(|err| match err {
                    GitError::PathConflict { path } => StorageError::KeyConflict { key: path },
                    err => err.into(),
                })?;
            if tree == prev_tree {
                debug!(reason = %req.message, "store update changes nothing; skipping commit");
                return Ok(Attempt::Done(()));
            }

            #[cfg(test)]
            hooks::run_before_swap();

            let condition = match prev_commit {
                Some(commit) => RefCondition::Matches(commit),
                None => RefCondition::Absent,
            };
            match self.commit_and_swap(&git, prev_commit, &tree, &req.message, condition) {
                Ok(commit) => {
                    debug!(%commit, attempt, reason = %req.message, "store updated");
                    Ok(Attempt::Done(()))
                }
                Err(err @ GitError::CasFailed { .. }) => Ok(Attempt::Conflict(err)),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn clear(&self, message: &str) -> Result<(), StorageError> {
        let git = self.git();
        let prev_commit = self.head(&git)?.map(|(commit, _)| commit);
        let tree = git.empty_tree()?;
        let commit =
            self.commit_and_swap(&git, prev_commit.as_ref(), &tree, message, RefCondition::Force)?;
        debug!(%commit, reason = message, "store cleared");
        Ok(())
    }
}

/// Test-only hook fired after an update has read the head and built its
/// tree, before the ref swap. Thread-local, so each test sees only its own.
#[cfg(test)]
pub(crate) mod hooks {
    use std::cell::RefCell;

    type Hook = Box<dyn FnOnce()>;

    thread_local! {
        static BEFORE_SWAP: RefCell<Option<Hook>> = const { RefCell::new(None) };
    }

    /// Run `hook` once, at the next swap on this thread.
    pub fn set_before_swap(hook: impl FnOnce() + 'static) {
        BEFORE_SWAP.with(|slot| *slot.borrow_mut() = Some(Box::new(hook)));
    }

    pub fn clear() {
        BEFORE_SWAP.with(|slot| slot.borrow_mut().take());
    }

    /// Taken before running, so updates made inside the hook don't refire it.
    pub(super) fn run_before_swap() {
        let hook = BEFORE_SWAP.with(|slot| slot.borrow_mut().take());
        if let Some(hook) = hook {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SetRequest;
    use serde_json::json;
    use tempfile::TempDir;

    fn backend() -> (TempDir, GitBackend) {
        let dir = TempDir::new().expect("create temp dir");
        let git = Git::init(dir.path()).expect("init repo");
        let backend = GitBackend::new(git, test_config());
        (dir, backend)
    }

    fn test_config() -> GitBackendConfig {
        GitBackendConfig {
            refname: RefName::new(DEFAULT_STORE_REF).unwrap(),
            signature: Signature::new("spindle-test", "test@example.com"),
            retry: RetryPolicy::immediate(5),
        }
    }

    fn set(key: &str, value: serde_json::Value) -> UpdateRequest {
        UpdateRequest {
            sets: vec![SetRequest::new(key, &value).unwrap()],
            deletes: Vec::new(),
            message: format!("set {key}"),
        }
    }

    fn head_commit(backend: &GitBackend) -> Option<Oid> {
        backend
            .git()
            .try_resolve_commit(DEFAULT_STORE_REF)
            .unwrap()
    }

    #[test]
    fn empty_store_has_nothing() {
        let (_dir, backend) = backend();
        assert!(matches!(backend.get("repo"), Err(StorageError::NotExist)));
        assert!(backend.keys("").unwrap().is_empty());
        assert!(backend.keys("branches").unwrap().is_empty());
    }

    #[test]
    fn set_then_get() {
        let (_dir, backend) = backend();
        backend.update(set("repo", json!({"trunk": "main"}))).unwrap();

        let raw = backend.get("repo").unwrap();
        assert_eq!(
            String::from_utf8(raw).unwrap(),
            "{\n  \"trunk\": \"main\"\n}\n"
        );
    }

    #[test]
    fn keys_are_relative_and_recursive() {
        let (_dir, backend) = backend();
        backend
            .update(UpdateRequest {
                sets: vec![
                    SetRequest::new("repo", &json!({})).unwrap(),
                    SetRequest::new("branches/feat", &json!({})).unwrap(),
                    SetRequest::new("branches/user/topic", &json!({})).unwrap(),
                ],
                deletes: Vec::new(),
                message: "seed".into(),
            })
            .unwrap();

        let mut keys = backend.keys("branches").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["feat", "user/topic"]);

        // A blob is not a directory.
        assert!(backend.keys("repo").unwrap().is_empty());
        // Directories are not values.
        assert!(matches!(backend.get("branches"), Err(StorageError::NotExist)));
    }

    #[test]
    fn each_update_is_one_commit_on_top_of_the_last() {
        let (_dir, backend) = backend();
        backend.update(set("a", json!(1))).unwrap();
        let first = head_commit(&backend).unwrap();
        backend.update(set("b", json!(2))).unwrap();
        let second = head_commit(&backend).unwrap();

        let git = backend.git();
        assert_eq!(git.commit_parents(&second).unwrap(), vec![first]);
        assert_eq!(git.commit_message(&second).unwrap(), "set b");
    }

    #[test]
    fn unchanged_tree_creates_no_commit() {
        let (_dir, backend) = backend();
        backend.update(set("a", json!(1))).unwrap();
        let before = head_commit(&backend);

        backend.update(set("a", json!(1))).unwrap();
        backend
            .update(UpdateRequest {
                deletes: vec!["missing".into()],
                message: "noop".into(),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(head_commit(&backend), before);
    }

    #[test]
    fn deletes_on_empty_store_write_nothing() {
        let (_dir, backend) = backend();
        backend
            .update(UpdateRequest {
                deletes: vec!["branches/x".into()],
                message: "noop".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(head_commit(&backend).is_none());
    }

    #[test]
    fn batch_sets_and_deletes_together() {
        let (_dir, backend) = backend();
        backend.update(set("branches/old", json!(1))).unwrap();
        backend
            .update(UpdateRequest {
                sets: vec![SetRequest::new("branches/new", &json!(2)).unwrap()],
                deletes: vec!["branches/old".into()],
                message: "rename".into(),
            })
            .unwrap();
        assert_eq!(backend.keys("branches").unwrap(), vec!["new"]);
    }

    #[test]
    fn clear_empties_store_with_new_commit() {
        let (_dir, backend) = backend();
        backend.update(set("a", json!(1))).unwrap();
        let before = head_commit(&backend).unwrap();

        backend.clear("reset").unwrap();

        let after = head_commit(&backend).unwrap();
        assert_ne!(before, after);
        assert!(backend.keys("").unwrap().is_empty());
        assert_eq!(backend.git().commit_parents(&after).unwrap(), vec![before]);
    }

    #[test]
    fn cancelled_update_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let token = CancelToken::new();
        let backend = GitBackend::new(Git::init(dir.path()).unwrap(), test_config())
            .with_cancel(token.clone());
        token.cancel();

        let err = backend.update(set("a", json!(1))).unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
        assert!(head_commit(&backend).is_none());
    }

    mod conflicts {
        use super::*;

        #[test]
        fn nested_key_under_value_rejected() {
            let (_dir, backend) = backend();
            backend.update(set("branches/feat", json!(1))).unwrap();
            let before = head_commit(&backend);

            let err = backend.update(set("branches/feat/x", json!(2))).unwrap_err();
            assert!(
                matches!(&err, StorageError::KeyConflict { key } if key == "branches/feat"),
                "{err}"
            );
            assert_eq!(head_commit(&backend), before);
            assert_eq!(backend.keys("branches").unwrap(), vec!["feat"]);
        }

        #[test]
        fn value_over_nested_keys_rejected() {
            let (_dir, backend) = backend();
            backend.update(set("branches/a/b", json!(1))).unwrap();
            let before = head_commit(&backend);

            let err = backend.update(set("branches/a", json!(2))).unwrap_err();
            assert!(
                matches!(&err, StorageError::KeyConflict { key } if key == "branches/a"),
                "{err}"
            );
            assert_eq!(head_commit(&backend), before);
            assert_eq!(backend.keys("branches").unwrap(), vec!["a/b"]);
        }

        #[test]
        fn deleting_a_directory_key_keeps_children() {
            let (_dir, backend) = backend();
            backend.update(set("branches/a/b", json!(1))).unwrap();
            backend
                .update(UpdateRequest {
                    deletes: vec!["branches/a".into()],
                    message: "noop".into(),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(backend.keys("branches").unwrap(), vec!["a/b"]);
        }
    }

    mod lost_race {
        use super::*;

        /// A second handle on the same repository, as another process would have.
        fn rival(dir: &TempDir) -> GitBackend {
            GitBackend::new(Git::open(dir.path()).unwrap(), test_config())
        }

        #[test]
        fn retry_rebuilds_on_moved_ref() {
            let (dir, backend) = backend();
            backend.update(set("a", json!(1))).unwrap();

            let other = rival(&dir);
            hooks::set_before_swap(move || {
                other.update(set("b", json!(2))).unwrap();
            });
            let result = backend.update(set("c", json!(3)));
            hooks::clear();
            result.unwrap();

            let mut keys = backend.keys("").unwrap();
            keys.sort();
            assert_eq!(keys, vec!["a", "b", "c"]);

            // The winning commit sits between ours and the seed.
            let head = head_commit(&backend).unwrap();
            let git = backend.git();
            let parents = git.commit_parents(&head).unwrap();
            assert_eq!(parents.len(), 1);
            assert_eq!(git.commit_message(&parents[0]).unwrap(), "set b");
            assert_eq!(git.commit_message(&head).unwrap(), "set c");
        }

        #[test]
        fn lost_race_on_last_attempt_exhausts() {
            let (dir, _) = backend();
            let backend = GitBackend::new(
                Git::open(dir.path()).unwrap(),
                GitBackendConfig {
                    retry: RetryPolicy::immediate(1),
                    ..test_config()
                },
            );
            backend.update(set("a", json!(1))).unwrap();

            let other = rival(&dir);
            hooks::set_before_swap(move || {
                other.update(set("b", json!(2))).unwrap();
            });
            let err = backend.update(set("c", json!(3))).unwrap_err();
            hooks::clear();

            assert!(
                matches!(err, StorageError::RetriesExhausted { attempts: 1, .. }),
                "{err}"
            );
            let keys = backend.keys("").unwrap();
            assert!(keys.contains(&"b".to_string()));
            assert!(!keys.contains(&"c".to_string()));
        }
    }

    #[test]
    fn blank_key_rejected() {
        let (_dir, backend) = backend();
        let err = backend.update(set("", json!(1))).unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
