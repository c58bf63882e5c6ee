//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Global Config
//!
//! Located at (in order of precedence):
//! 1. `$SPINDLE_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/spindle/config.toml`
//! 3. `~/.spindle/config.toml`
//!
//! # Repo Config
//!
//! Located at `<git-dir>/spindle/config.toml`.
//!
//! # Validation
//!
//! Config values are validated after parsing to ensure they conform to
//! expected formats (e.g., trunk must be a valid branch name).

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::types::{BranchName, RefName};

/// Global configuration (user scope).
///
/// # Example
///
/// ```toml
/// [store]
/// author_name = "Jane Doe"
/// author_email = "jane@example.com"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Identity recorded on store commits
    pub store: Option<StoreIdentity>,
}

/// Author of the commits the store writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreIdentity {
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

impl GlobalConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(identity) = &self.store else {
            return Ok(());
        };

        if let Some(name) = &identity.author_name {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "store.author_name cannot be empty".into(),
                ));
            }
        }
        if let Some(email) = &identity.author_email {
            if email.trim().is_empty() || email.contains(['<', '>']) {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid store.author_email '{email}'"
                )));
            }
        }

        Ok(())
    }
}

/// Repository configuration.
///
/// # Example
///
/// ```toml
/// trunk = "main"
/// remote = "origin"
///
/// [store]
/// ref = "refs/spindle/data"
/// update_attempts = 5
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RepoConfig {
    /// Trunk branch used by `spindle init` when none is given
    pub trunk: Option<String>,

    /// Remote used by `spindle init` when none is given
    pub remote: Option<String>,

    /// Where and how the store is kept
    pub store: Option<RepoStoreConfig>,
}

/// Repository-scoped store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RepoStoreConfig {
    /// Ref holding the store
    #[serde(rename = "ref")]
    pub refname: Option<String>,

    /// Compare-and-swap attempts per update (at least 1)
    pub update_attempts: Option<u32>,
}

impl RepoConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(trunk) = &self.trunk {
            BranchName::new(trunk.as_str()).map_err(|e| {
                ConfigError::InvalidValue(format!("invalid trunk '{trunk}': {e}"))
            })?;
        }

        if let Some(remote) = &self.remote {
            if remote.trim().is_empty() {
                return Err(ConfigError::InvalidValue("remote cannot be empty".into()));
            }
        }

        if let Some(store) = &self.store {
            if let Some(refname) = &store.refname {
                RefName::new(refname.as_str()).map_err(|e| {
                    ConfigError::InvalidValue(format!("invalid store.ref '{refname}': {e}"))
                })?;
            }
            if store.update_attempts == Some(0) {
                return Err(ConfigError::InvalidValue(
                    "store.update_attempts must be at least 1".into(),
                ));
            }
        }

        Ok(())
    }
}
