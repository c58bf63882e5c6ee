//! forge::registry
//!
//! Explicit collection of known forges.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::hosts::HostForge;
use super::{Forge, ForgeError, RepoId};

/// Known forges, keyed by ID.
///
/// Build one at startup and pass it to the code that needs it.
#[derive(Debug, Clone, Default)]
pub struct ForgeRegistry {
    forges: BTreeMap<String, Arc<dyn Forge>>,
}

impl ForgeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in GitHub, GitLab and Bitbucket forges.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for forge in [HostForge::github(), HostForge::gitlab(), HostForge::bitbucket()] {
            registry.forges.insert(forge.id().to_string(), Arc::new(forge));
        }
        registry
    }

    /// Add a forge, replacing any forge with the same ID.
    ///
    /// Returns the forge that was replaced.
    ///
    /// # Errors
    ///
    /// - [`ForgeError::MissingId`] / [`ForgeError::InvalidId`] if the ID
    ///   cannot be used as a change metadata key
    pub fn register(&mut self, forge: Arc<dyn Forge>) -> Result<Option<Arc<dyn Forge>>, ForgeError> {
        let id = forge.id().to_string();
        validate_id(&id)?;
        Ok(self.forges.insert(id, forge))
    }

    /// Remove a forge. Returns it if it was registered.
    pub fn unregister(&mut self, id: &str) -> Option<Arc<dyn Forge>> {
        self.forges.remove(id)
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<dyn Forge>> {
        self.forges.get(id).cloned()
    }

    /// All registered forges, sorted by ID.
    pub fn all(&self) -> Vec<Arc<dyn Forge>> {
        self.forges.values().cloned().collect()
    }

    /// IDs of all registered forges, sorted.
    pub fn ids(&self) -> Vec<&str> {
        self.forges.keys().map(String::as_str).collect()
    }

    /// The first forge, by ID, that recognizes `url`.
    pub fn match_url(&self, url: &str) -> Option<(Arc<dyn Forge>, RepoId)> {
        self.forges
            .values()
            .find_map(|forge| forge.match_url(url).map(|repo| (Arc::clone(forge), repo)))
    }
}

fn validate_id(id: &str) -> Result<(), ForgeError> {
    if id.is_empty() {
        return Err(ForgeError::MissingId);
    }
    let valid = id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        return Err(ForgeError::InvalidId(id.to_string()));
    }
    Ok(())
}
