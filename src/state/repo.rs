//! state::repo
//!
//! Repository-level settings: trunk and remote.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{StateError, Store};

pub(crate) const REPO_KEY: &str = "repo";

/// Persisted repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub trunk: String,
    /// Empty when no remote is configured.
    #[serde(default)]
    pub remote: String,
}

impl RepoInfo {
    pub fn validate(&self) -> Result<(), StateError> {
        if self.trunk.trim().is_empty() {
            return Err(StateError::Corrupt("trunk branch name is empty".into()));
        }
        Ok(())
    }
}

impl Store {
    /// Trunk branch of the repository.
    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    /// Remote used for pushing and pulling.
    ///
    /// # Errors
    ///
    /// - [`StateError::NotExist`] if no remote is configured
    pub fn remote(&self) -> Result<&str, StateError> {
        self.remote.as_deref().ok_or(StateError::NotExist)
    }

    /// Change the configured remote. An empty remote removes it.
    pub fn set_remote(&mut self, remote: &str) -> Result<(), StateError> {
        let mut info: RepoInfo = self.db().get(REPO_KEY)?;
        info.remote = remote.to_string();
        info.validate()?;

        self.db()
            .set(REPO_KEY, &info, &format!("set remote: {remote}"))?;
        debug!(remote, "remote updated");

        self.remote = Some(info.remote).filter(|remote| !remote.is_empty());
        Ok(())
    }
}
