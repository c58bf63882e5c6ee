//! git::interface
//!
//! Git interface implementation using git2.
//!
//! This module provides the **single doorway** to all Git operations in
//! spindle. The state store is built entirely out of the primitives exposed
//! here: blobs, trees, commits and compare-and-swap reference updates.
//!
//! # Error Handling
//!
//! Git errors are categorized into typed variants:
//! - [`GitError::NotARepo`]: Not inside a Git repository
//! - [`GitError::RefNotFound`]: Requested ref does not exist
//! - [`GitError::CasFailed`]: Compare-and-swap precondition failed
//! - [`GitError::ObjectNotFound`]: Object missing from the database
//! - [`GitError::PathConflict`]: A file and a directory would share a path
//!
//! # Example
//!
//! ```ignore
//! use spindle::git::{Git, SetRefRequest};
//! use std::path::Path;
//!
//! let git = Git::open(Path::new("."))?;
//! let blob = git.write_blob(b"{}\n")?;
//! let tree = git.update_tree(None, &[BlobWrite::new("repo", blob)], &[])?;
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::types::{Oid, RefName, TypeError};

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Not inside a Git repository.
    #[error("not a git repository: {path}")]
    NotARepo {
        /// The path that was searched
        path: PathBuf,
    },

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound {
        /// The ref that was not found
        refname: String,
    },

    /// Compare-and-swap precondition failed.
    ///
    /// Another writer advanced the ref between our read and our update.
    #[error("CAS failed for {refname}: expected {expected}, found {actual}")]
    CasFailed {
        /// The ref being updated
        refname: String,
        /// The expected old value
        expected: String,
        /// The actual current value
        actual: String,
    },

    /// Object not found in repository.
    #[error("object not found: {oid}")]
    ObjectNotFound {
        /// The OID that was not found
        oid: String,
    },

    /// An object exists but has a different type than required.
    #[error("object {oid} is not a {expected}")]
    WrongObjectType {
        /// The OID of the object
        oid: String,
        /// The type that was required
        expected: &'static str,
    },

    /// Invalid object id format.
    #[error("invalid object id: {oid}")]
    InvalidOid {
        /// The invalid OID string
        oid: String,
    },

    /// Invalid ref name format.
    #[error("invalid ref name: {message}")]
    InvalidRefName {
        /// Description of the problem
        message: String,
    },

    /// Invalid path inside a tree.
    #[error("invalid tree path: {path}")]
    InvalidPath {
        /// The rejected path
        path: String,
    },

    /// A write would replace a blob with a tree, or a tree with a blob.
    #[error("tree path conflict at {path}: a file and a directory cannot share a name")]
    PathConflict {
        /// The path holding the entry of the other kind
        path: String,
    },

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl GitError {
    /// Create a GitError from a git2::Error with richer context.
    fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound if context.starts_with("refs/") => GitError::RefNotFound {
                refname: context.to_string(),
            },
            git2::ErrorCode::NotFound => GitError::ObjectNotFound {
                oid: context.to_string(),
            },
            git2::ErrorCode::InvalidSpec => GitError::InvalidOid {
                oid: context.to_string(),
            },
            _ => GitError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        GitError::Internal {
            message: err.message().to_string(),
        }
    }
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidOid(msg) => GitError::InvalidOid { oid: msg },
            TypeError::InvalidRefName(msg) => GitError::InvalidRefName { message: msg },
            TypeError::InvalidBranchName(msg) => GitError::InvalidRefName { message: msg },
        }
    }
}

/// Kind of object a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
    /// Submodule commits and anything else the store never writes.
    Other,
}

/// An entry found while reading a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Path relative to the tree that was listed, `/`-separated.
    pub path: String,
    /// Object the entry points at.
    pub oid: Oid,
    /// Kind of that object.
    pub kind: EntryKind,
}

/// A blob to place at a path when rewriting a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobWrite {
    /// `/`-separated destination path; intermediate trees are created.
    pub path: String,
    /// Blob to place there.
    pub oid: Oid,
}

impl BlobWrite {
    pub fn new(path: impl Into<String>, oid: Oid) -> Self {
        Self {
            path: path.into(),
            oid,
        }
    }
}

/// Author/committer identity for commits created by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    fn to_git2(&self) -> Result<git2::Signature<'static>, GitError> {
        git2::Signature::now(&self.name, &self.email)
            .map_err(|e| GitError::from_git2(e, "signature"))
    }
}

/// Request to create a commit object without touching any ref.
#[derive(Debug)]
pub struct CommitRequest<'a> {
    pub tree: &'a Oid,
    pub parents: &'a [Oid],
    pub author: &'a Signature,
    pub committer: &'a Signature,
    pub message: &'a str,
}

/// How a ref update is conditioned on the ref's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefCondition<'a> {
    /// The ref must currently point at this commit.
    Matches(&'a Oid),
    /// The ref must not exist yet.
    Absent,
    /// Overwrite unconditionally.
    Force,
}

/// Request to point a ref at a new commit.
#[derive(Debug)]
pub struct SetRefRequest<'a> {
    pub refname: &'a RefName,
    pub new: &'a Oid,
    pub condition: RefCondition<'a>,
    /// Reflog message.
    pub message: &'a str,
}

/// The Git interface.
///
/// This is the **single point of interaction** with Git. No other module
/// imports `git2`.
///
/// `Git` is `Send` but not `Sync`; share it across threads behind a mutex.
pub struct Git {
    repo: git2::Repository,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("path", &self.repo.path())
            .finish()
    }
}

impl Git {
    // =========================================================================
    // Repository Opening
    // =========================================================================

    /// Open a repository at the given path.
    ///
    /// Uses `git2::Repository::discover`, so `path` can be any directory
    /// within the repository. Bare repositories are accepted: the store only
    /// needs the object database and refs.
    ///
    /// # Errors
    ///
    /// - [`GitError::NotARepo`] if no repository is found
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::discover(path).map_err(|_| GitError::NotARepo {
            path: path.to_path_buf(),
        })?;
        Ok(Self { repo })
    }

    /// Initialize a new, empty repository at `path`.
    pub fn init(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::init(path)
            .map_err(|e| GitError::from_git2(e, &path.display().to_string()))?;
        Ok(Self { repo })
    }

    /// Path to the `.git` directory (or the repository itself when bare).
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    /// Short name of the branch HEAD points at, if any.
    ///
    /// Works for unborn branches too, which is the common case right after
    /// `git init`.
    pub fn head_branch(&self) -> Option<String> {
        match self.repo.head() {
            Ok(head) if head.is_branch() => head.shorthand().map(str::to_string),
            Ok(_) => None,
            Err(_) => self
                .repo
                .find_reference("HEAD")
                .ok()
                .and_then(|head| head.symbolic_target().map(str::to_string))
                .and_then(|target| target.strip_prefix("refs/heads/").map(str::to_string)),
        }
    }

    // =========================================================================
    // Ref Resolution
    // =========================================================================

    /// Resolve a ref to the commit it points at.
    ///
    /// Returns `Ok(None)` if the ref doesn't exist, which for the store means
    /// "no history yet".
    pub fn try_resolve_commit(&self, refname: &str) -> Result<Option<Oid>, GitError> {
        let reference = match self.repo.find_reference(refname) {
            Ok(r) => r,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(GitError::from_git2(e, refname)),
        };

        let commit = reference
            .peel_to_commit()
            .map_err(|e| GitError::from_git2(e, refname))?;
        Ok(Some(oid_from_git2(commit.id())?))
    }

    /// Get the root tree of a commit.
    pub fn commit_tree(&self, commit: &Oid) -> Result<Oid, GitError> {
        let commit = self
            .repo
            .find_commit(oid_to_git2(commit)?)
            .map_err(|e| GitError::from_git2(e, commit.as_str()))?;
        oid_from_git2(commit.tree_id())
    }

    /// Get the parents of a commit.
    pub fn commit_parents(&self, commit: &Oid) -> Result<Vec<Oid>, GitError> {
        let commit = self
            .repo
            .find_commit(oid_to_git2(commit)?)
            .map_err(|e| GitError::from_git2(e, commit.as_str()))?;
        commit.parent_ids().map(oid_from_git2).collect()
    }

    /// Get the full message of a commit.
    pub fn commit_message(&self, commit: &Oid) -> Result<String, GitError> {
        let commit = self
            .repo
            .find_commit(oid_to_git2(commit)?)
            .map_err(|e| GitError::from_git2(e, commit.as_str()))?;
        Ok(commit.message().unwrap_or_default().to_string())
    }

    // =========================================================================
    // Blob Operations
    // =========================================================================

    /// Write content as a blob and return its OID.
    pub fn write_blob(&self, content: &[u8]) -> Result<Oid, GitError> {
        let oid = self
            .repo
            .blob(content)
            .map_err(|e| GitError::from_git2(e, "write blob"))?;
        oid_from_git2(oid)
    }

    /// Read a blob by OID.
    ///
    /// # Errors
    ///
    /// - [`GitError::ObjectNotFound`] if the blob doesn't exist
    pub fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>, GitError> {
        let blob = self
            .repo
            .find_blob(oid_to_git2(oid)?)
            .map_err(|e| GitError::from_git2(e, oid.as_str()))?;
        Ok(blob.content().to_vec())
    }

    // =========================================================================
    // Tree Operations
    // =========================================================================

    /// OID of the empty tree, writing it if the database lacks it.
    pub fn empty_tree(&self) -> Result<Oid, GitError> {
        let builder = self.repo.treebuilder(None)?;
        oid_from_git2(builder.write()?)
    }

    /// Resolve a `/`-separated path inside a tree.
    ///
    /// Returns `Ok(None)` if nothing exists at that path.
    pub fn entry_at(&self, tree: &Oid, path: &str) -> Result<Option<TreeEntry>, GitError> {
        let tree_obj = self.find_tree(tree)?;
        match tree_obj.get_path(Path::new(path)) {
            Ok(entry) => Ok(Some(TreeEntry {
                path: path.to_string(),
                oid: oid_from_git2(entry.id())?,
                kind: entry_kind(entry.kind()),
            })),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, path)),
        }
    }

    /// List the entries of a tree.
    ///
    /// With `recurse`, subtrees are descended into and only their
    /// non-tree entries are reported, with paths relative to `tree`.
    pub fn list_tree(&self, tree: &Oid, recurse: bool) -> Result<Vec<TreeEntry>, GitError> {
        let tree_obj = self.find_tree(tree)?;
        let mut entries = Vec::new();

        if !recurse {
            for entry in tree_obj.iter() {
                let Some(name) = entry.name() else { continue };
                entries.push(TreeEntry {
                    path: name.to_string(),
                    oid: oid_from_git2(entry.id())?,
                    kind: entry_kind(entry.kind()),
                });
            }
            return Ok(entries);
        }

        let mut walk_err = None;
        let walked = tree_obj.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            let kind = entry_kind(entry.kind());
            if kind == EntryKind::Tree {
                return git2::TreeWalkResult::Ok;
            }
            let Some(name) = entry.name() else {
                return git2::TreeWalkResult::Ok;
            };
            match oid_from_git2(entry.id()) {
                Ok(oid) => {
                    entries.push(TreeEntry {
                        path: format!("{root}{name}"),
                        oid,
                        kind,
                    });
                    git2::TreeWalkResult::Ok
                }
                Err(e) => {
                    walk_err = Some(e);
                    git2::TreeWalkResult::Abort
                }
            }
        });

        if let Some(e) = walk_err {
            return Err(e);
        }
        walked?;
        Ok(entries)
    }

    /// Build a new tree from `base` with `writes` applied and `deletes`
    /// removed.
    ///
    /// Paths are `/`-separated. Intermediate trees are created as needed and
    /// subtrees left empty by deletions are pruned. Deletes name blobs:
    /// deleting a path that does not exist, or that is a directory, is a
    /// no-op. A `None` base starts from the empty tree.
    ///
    /// Unchanged subtrees keep their OIDs, so applying an edit that matches
    /// what is already there yields exactly `base` back.
    ///
    /// # Errors
    ///
    /// - [`GitError::PathConflict`] if a write would replace a blob with a
    ///   tree or a tree with a blob, e.g. `a` and `a/b` at once
    pub fn update_tree(
        &self,
        base: Option<&Oid>,
        writes: &[BlobWrite],
        deletes: &[String],
    ) -> Result<Oid, GitError> {
        let mut edits = Vec::with_capacity(writes.len() + deletes.len());
        for write in writes {
            validate_tree_path(&write.path)?;
            edits.push((write.path.as_str(), TreeEdit::Write(oid_to_git2(&write.oid)?)));
        }
        for path in deletes {
            validate_tree_path(path)?;
            edits.push((path.as_str(), TreeEdit::Delete));
        }

        let base_tree = match base {
            Some(oid) => Some(self.find_tree(oid)?),
            None => None,
        };

        match self.apply_edits(base_tree.as_ref(), "", edits)? {
            Some(oid) => oid_from_git2(oid),
            None => self.empty_tree(),
        }
    }

    /// Apply edits to one level of a tree, recursing into subdirectories.
    ///
    /// `prefix` is the path of this level, used in error messages. Deletes
    /// run first, then subdirectories, then leaf writes, so a batch may swap
    /// a blob for a directory of the same name. A write never replaces an
    /// entry of the other kind.
    ///
    /// Returns `None` when the resulting tree would be empty.
    fn apply_edits(
        &self,
        base: Option<&git2::Tree<'_>>,
        prefix: &str,
        edits: Vec<(&str, TreeEdit)>,
    ) -> Result<Option<git2::Oid>, GitError> {
        let mut builder = self.repo.treebuilder(base)?;
        let mut nested: std::collections::BTreeMap<&str, Vec<(&str, TreeEdit)>> =
            std::collections::BTreeMap::new();
        let mut leaf_writes = Vec::new();

        for (path, edit) in edits {
            match (path.split_once('/'), edit) {
                (Some((dir, rest)), edit) => nested.entry(dir).or_default().push((rest, edit)),
                (None, TreeEdit::Write(oid)) => leaf_writes.push((path, oid)),
                (None, TreeEdit::Delete) => {
                    let is_blob = builder
                        .get(path)?
                        .is_some_and(|entry| entry.kind() != Some(git2::ObjectType::Tree));
                    if is_blob {
                        builder.remove(path)?;
                    }
                }
            }
        }

        for (dir, sub_edits) in nested {
            let path = format!("{prefix}{dir}");
            let existing = builder
                .get(dir)?
                .map(|entry| (entry.id(), entry.kind() == Some(git2::ObjectType::Tree)));
            let sub_base = match existing {
                Some((oid, true)) => Some(self.repo.find_tree(oid)?),
                Some((_, false)) => {
                    if sub_edits.iter().any(|(_, edit)| matches!(edit, TreeEdit::Write(_))) {
                        return Err(GitError::PathConflict { path });
                    }
                    // Nothing to delete below a blob.
                    continue;
                }
                None => None,
            };

            match self.apply_edits(sub_base.as_ref(), &format!("{path}/"), sub_edits)? {
                Some(oid) => {
                    builder.insert(dir, oid, i32::from(git2::FileMode::Tree))?;
                }
                None => {
                    if builder.get(dir)?.is_some() {
                        builder.remove(dir)?;
                    }
                }
            }
        }

        for (path, oid) in leaf_writes {
            let is_tree = builder
                .get(path)?
                .is_some_and(|entry| entry.kind() == Some(git2::ObjectType::Tree));
            if is_tree {
                return Err(GitError::PathConflict {
                    path: format!("{prefix}{path}"),
                });
            }
            builder.insert(path, oid, i32::from(git2::FileMode::Blob))?;
        }

        if builder.len() == 0 {
            return Ok(None);
        }
        Ok(Some(builder.write()?))
    }

    fn find_tree(&self, oid: &Oid) -> Result<git2::Tree<'_>, GitError> {
        let object = self
            .repo
            .find_object(oid_to_git2(oid)?, None)
            .map_err(|e| GitError::from_git2(e, oid.as_str()))?;
        object.into_tree().map_err(|_| GitError::WrongObjectType {
            oid: oid.to_string(),
            expected: "tree",
        })
    }

    // =========================================================================
    // Commits and Refs
    // =========================================================================

    /// Create a commit object. No ref is updated.
    pub fn commit(&self, req: &CommitRequest<'_>) -> Result<Oid, GitError> {
        let tree = self.find_tree(req.tree)?;
        let parents = req
            .parents
            .iter()
            .map(|oid| {
                self.repo
                    .find_commit(oid_to_git2(oid)?)
                    .map_err(|e| GitError::from_git2(e, oid.as_str()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let oid = self
            .repo
            .commit(
                None,
                &req.author.to_git2()?,
                &req.committer.to_git2()?,
                req.message,
                &tree,
                &parent_refs,
            )
            .map_err(|e| GitError::from_git2(e, "commit"))?;
        oid_from_git2(oid)
    }

    /// Point a ref at a new commit.
    ///
    /// [`RefCondition::Matches`] is an atomic compare-and-swap performed by
    /// libgit2 under the ref's lock. [`RefCondition::Absent`] only creates
    /// the ref. Losing either race yields [`GitError::CasFailed`].
    pub fn set_ref(&self, req: &SetRefRequest<'_>) -> Result<(), GitError> {
        let refname = req.refname.as_str();
        let new = oid_to_git2(req.new)?;

        let result = match req.condition {
            RefCondition::Force => self.repo.reference(refname, new, true, req.message),
            RefCondition::Absent => self.repo.reference(refname, new, false, req.message),
            RefCondition::Matches(old) => {
                self.repo
                    .reference_matching(refname, new, true, oid_to_git2(old)?, req.message)
            }
        };

        match result {
            Ok(_) => Ok(()),
            Err(e) if req.condition != RefCondition::Force && is_race(&e) => {
                let expected = match req.condition {
                    RefCondition::Matches(old) => old.to_string(),
                    _ => "<none>".to_string(),
                };
                let actual = self
                    .try_resolve_ref_raw(refname)?
                    .unwrap_or_else(|| "<none>".to_string());
                Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected,
                    actual,
                })
            }
            Err(e) => Err(GitError::from_git2(e, refname)),
        }
    }

    /// Resolve a ref to its raw target without peeling.
    fn try_resolve_ref_raw(&self, refname: &str) -> Result<Option<String>, GitError> {
        match self.repo.find_reference(refname) {
            Ok(reference) => Ok(reference.target().map(|oid| oid.to_string())),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, refname)),
        }
    }
}

enum TreeEdit {
    Write(git2::Oid),
    Delete,
}

/// Error codes libgit2 reports when another writer got to the ref first.
fn is_race(err: &git2::Error) -> bool {
    matches!(
        err.code(),
        git2::ErrorCode::Modified
            | git2::ErrorCode::Exists
            | git2::ErrorCode::Locked
            | git2::ErrorCode::NotFound
    )
}

fn entry_kind(kind: Option<git2::ObjectType>) -> EntryKind {
    match kind {
        Some(git2::ObjectType::Blob) => EntryKind::Blob,
        Some(git2::ObjectType::Tree) => EntryKind::Tree,
        _ => EntryKind::Other,
    }
}

fn validate_tree_path(path: &str) -> Result<(), GitError> {
    let bad = path.is_empty()
        || path
            .split('/')
            .any(|component| component.is_empty() || component == "." || component == "..");
    if bad {
        return Err(GitError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(())
}

fn oid_to_git2(oid: &Oid) -> Result<git2::Oid, GitError> {
    git2::Oid::from_str(oid.as_str()).map_err(|e| GitError::from_git2(e, oid.as_str()))
}

fn oid_from_git2(oid: git2::Oid) -> Result<Oid, GitError> {
    Ok(Oid::new(oid.to_string())?)
}
