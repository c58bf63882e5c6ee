//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! Spindle has two configuration scopes:
//! - **Global**: User-level settings (commit identity of the store)
//! - **Repo**: Repository-level settings (trunk, remote, store ref)
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. Repo config file
//! 4. CLI flags (not handled here)
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$SPINDLE_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/spindle/config.toml`
//! 3. `~/.spindle/config.toml`
//!
//! # Repo Config Location
//!
//! `<git-dir>/spindle/config.toml`, next to the repository's own config so
//! it is never committed.
//!
//! # Example
//!
//! ```no_run
//! use spindle::core::config::Config;
//! use std::path::Path;
//!
//! let config = Config::load(Some(Path::new("/path/to/repo/.git"))).unwrap();
//!
//! println!("Store ref: {}", config.store_ref());
//! println!("Attempts: {}", config.update_attempts());
//! let backend_config = config.git_backend_config().unwrap();
//! ```

pub mod schema;

pub use schema::{GlobalConfig, RepoConfig, RepoStoreConfig, StoreIdentity};

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::core::types::RefName;
use crate::git::Signature;
use crate::storage::{GitBackendConfig, RetryPolicy, DEFAULT_STORE_REF};

/// Default author name of store commits.
pub const DEFAULT_AUTHOR_NAME: &str = "spindle";

/// Default author email of store commits.
pub const DEFAULT_AUTHOR_EMAIL: &str = "spindle@localhost";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Merged configuration from all sources.
///
/// This struct provides accessor methods that apply defaults
/// automatically.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Global configuration
    pub global: GlobalConfig,
    /// Repository configuration (if in a repo)
    pub repo: Option<RepoConfig>,
    /// Path to the global config file (if loaded)
    global_path: Option<PathBuf>,
    /// Path to the repo config file (if loaded)
    repo_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// If `git_dir` is provided, also loads that repository's config.
    ///
    /// # Errors
    ///
    /// Returns an error if config files exist but cannot be parsed or
    /// hold invalid values. Missing config files are not an error.
    pub fn load(git_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let (global, global_path) = match Self::find_global() {
            Some(path) => (read_config::<GlobalConfig>(&path)?, Some(path)),
            None => (GlobalConfig::default(), None),
        };

        let (repo, repo_path) = match git_dir.map(Self::repo_config_path) {
            Some(path) if path.exists() => (Some(read_config::<RepoConfig>(&path)?), Some(path)),
            _ => (None, None),
        };

        global.validate()?;
        if let Some(ref r) = repo {
            r.validate()?;
        }

        Ok(Config {
            global,
            repo,
            global_path,
            repo_path,
        })
    }

    /// Locate the global config file, if any.
    fn find_global() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SPINDLE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("spindle/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        dirs::home_dir()
            .map(|home| home.join(".spindle/config.toml"))
            .filter(|path| path.exists())
    }

    /// Path of the repo config for the repository at `git_dir`.
    pub fn repo_config_path(git_dir: &Path) -> PathBuf {
        git_dir.join("spindle/config.toml")
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    fn repo_store(&self) -> Option<&RepoStoreConfig> {
        self.repo.as_ref().and_then(|r| r.store.as_ref())
    }

    fn identity(&self) -> Option<&StoreIdentity> {
        self.global.store.as_ref()
    }

    /// Configured trunk branch, if any.
    pub fn trunk(&self) -> Option<&str> {
        self.repo.as_ref().and_then(|r| r.trunk.as_deref())
    }

    /// Configured remote, if any.
    pub fn remote(&self) -> Option<&str> {
        self.repo.as_ref().and_then(|r| r.remote.as_deref())
    }

    /// Ref holding the store (default: `refs/spindle/data`).
    pub fn store_ref(&self) -> &str {
        self.repo_store()
            .and_then(|s| s.refname.as_deref())
            .unwrap_or(DEFAULT_STORE_REF)
    }

    /// Compare-and-swap attempts per store update (default: 5).
    pub fn update_attempts(&self) -> u32 {
        self.repo_store()
            .and_then(|s| s.update_attempts)
            .unwrap_or(RetryPolicy::default().attempts)
    }

    /// Author and committer of store commits.
    pub fn signature(&self) -> Signature {
        let name = self
            .identity()
            .and_then(|i| i.author_name.as_deref())
            .unwrap_or(DEFAULT_AUTHOR_NAME);
        let email = self
            .identity()
            .and_then(|i| i.author_email.as_deref())
            .unwrap_or(DEFAULT_AUTHOR_EMAIL);
        Signature::new(name, email)
    }

    /// Settings for the git-backed store.
    pub fn git_backend_config(&self) -> Result<GitBackendConfig, ConfigError> {
        let refname = RefName::new(self.store_ref())
            .map_err(|e| ConfigError::InvalidValue(format!("invalid store.ref: {e}")))?;
        Ok(GitBackendConfig {
            refname,
            signature: self.signature(),
            retry: RetryPolicy {
                attempts: self.update_attempts(),
                ..RetryPolicy::default()
            },
        })
    }

    /// Path the global config was loaded from.
    pub fn global_config_loaded_from(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Path the repo config was loaded from.
    pub fn repo_config_loaded_from(&self) -> Option<&Path> {
        self.repo_path.as_deref()
    }
}

/// Read and parse a TOML config file.
fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_repo_config(contents: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        let path = Config::repo_config_path(temp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        temp
    }

    #[test]
    fn defaults_without_files() {
        let config = Config::default();

        assert!(config.trunk().is_none());
        assert!(config.remote().is_none());
        assert_eq!(config.store_ref(), "refs/spindle/data");
        assert_eq!(config.update_attempts(), 5);
        assert_eq!(
            config.signature(),
            Signature::new("spindle", "spindle@localhost")
        );
    }

    #[test]
    fn load_repo_config() {
        let git_dir = write_repo_config(
            r#"
            trunk = "main"
            remote = "upstream"

            [store]
            ref = "refs/spindle/alt"
            update_attempts = 2
            "#,
        );

        let config = Config::load(Some(git_dir.path())).unwrap();

        assert_eq!(config.trunk(), Some("main"));
        assert_eq!(config.remote(), Some("upstream"));
        assert_eq!(config.store_ref(), "refs/spindle/alt");
        assert_eq!(
            config.repo_config_loaded_from(),
            Some(Config::repo_config_path(git_dir.path()).as_path())
        );

        let backend = config.git_backend_config().unwrap();
        assert_eq!(backend.refname.as_str(), "refs/spindle/alt");
        assert_eq!(backend.retry.attempts, 2);
    }

    #[test]
    fn missing_repo_config_is_fine() {
        let temp = TempDir::new().unwrap();
        let config = Config::load(Some(temp.path())).unwrap();
        assert!(config.repo.is_none());
        assert!(config.repo_config_loaded_from().is_none());
    }

    #[test]
    fn invalid_trunk_rejected() {
        let git_dir = write_repo_config("trunk = \"invalid..name\"");
        assert!(matches!(
            Config::load(Some(git_dir.path())),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn unknown_fields_rejected() {
        let git_dir = write_repo_config(
            r#"
            trunk = "main"
            unknown_field = true
            "#,
        );
        assert!(matches!(
            Config::load(Some(git_dir.path())),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn global_identity_used_for_signature() {
        let config = Config {
            global: GlobalConfig {
                store: Some(StoreIdentity {
                    author_name: Some("Jane".into()),
                    author_email: None,
                }),
            },
            ..Default::default()
        };
        assert_eq!(config.signature(), Signature::new("Jane", "spindle@localhost"));
    }
}
