//! forge
//!
//! Code-hosting services that own a branch's published change.
//!
//! # Architecture
//!
//! The store records a change as `{forge-id: payload}` and never looks
//! inside the payload. The [`Forge`] trait is what a caller needs to go from
//! that ID back to something that understands it: the forge's identity, a
//! way to recognize its remote URLs, and where it keeps change templates.
//!
//! Forges are collected in a [`ForgeRegistry`] that is built once and passed
//! to whoever needs it. There is no process-wide registry.
//!
//! # Modules
//!
//! - `hosts`: built-in forges matched by host name (GitHub, GitLab, Bitbucket)
//! - `registry`: the [`ForgeRegistry`]
//!
//! # Example
//!
//! ```
//! use spindle::forge::ForgeRegistry;
//!
//! let registry = ForgeRegistry::with_builtin();
//! let (forge, repo) = registry
//!     .match_url("git@github.com:octocat/hello-world.git")
//!     .unwrap();
//! assert_eq!(forge.id(), "github");
//! assert_eq!(repo.owner, "octocat");
//! ```

mod hosts;
mod registry;

use thiserror::Error;

pub use hosts::HostForge;
pub use registry::ForgeRegistry;

/// Errors from forge operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ForgeError {
    #[error("forge id is required")]
    MissingId,

    #[error("invalid forge id '{0}': only lowercase letters, digits and '-' are allowed")]
    InvalidId(String),
}

/// A repository identified on a forge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    /// User, organization, or group path.
    pub owner: String,
    pub repo: String,
}

/// A code-hosting service.
pub trait Forge: Send + Sync {
    /// Stable identifier, used as the key of persisted change metadata.
    fn id(&self) -> &str;

    /// Recognize a remote URL of this forge.
    ///
    /// Returns `None` for URLs belonging to other hosts.
    fn match_url(&self, url: &str) -> Option<RepoId>;

    /// Paths, relative to the repository root, where change templates may
    /// be found. Earlier paths take priority.
    fn change_template_paths(&self) -> &[&'static str];
}

impl std::fmt::Debug for dyn Forge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forge").field("id", &self.id()).finish()
    }
}
