//! git
//!
//! Single interface for all Git operations.
//!
//! # Architecture
//!
//! This module is the **ONLY doorway** to Git. The state store never parses
//! `.git` internals itself and no other module imports `git2`.
//!
//! # Responsibilities
//!
//! - Repository discovery, opening and initialization
//! - Object operations (read blob, write blob, build trees, create commits)
//! - Ref operations (resolve, compare-and-swap, create-only, force)
//!
//! # Invariants
//!
//! - Conditional ref updates are atomic; losing a race is [`GitError::CasFailed`]
//! - Tree edits never disturb entries they do not name
//! - All operations return strong types (Oid, RefName)
//!
//! # Example
//!
//! ```ignore
//! use spindle::git::{Git, RefCondition, SetRefRequest};
//! use std::path::Path;
//!
//! let git = Git::open(Path::new("."))?;
//! let current = git.try_resolve_commit("refs/spindle/data")?;
//!
//! // CAS update (fails if ref changed since read)
//! git.set_ref(&SetRefRequest {
//!     refname: &refname,
//!     new: &new_commit,
//!     condition: RefCondition::Matches(&current_commit),
//!     message: "spindle: update",
//! })?;
//! ```

mod interface;

pub use interface::{
    BlobWrite, CommitRequest, EntryKind, Git, GitError, RefCondition, SetRefRequest, Signature,
    TreeEntry,
};
