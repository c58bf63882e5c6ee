//! state::template
//!
//! Cache of forge change templates.
//!
//! Finding templates means walking several paths in the working tree, so the
//! result is cached along with a key computed by the caller. Reads hand the
//! key back; deciding whether it is still current is up to the caller.

use serde::{Deserialize, Serialize};

use super::{StateError, Store};

const TEMPLATES_KEY: &str = "templates";

/// A cached change template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTemplate {
    /// Name of the template. Not necessarily a path on disk.
    pub filename: String,
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TemplateCache {
    key: String,
    #[serde(default)]
    templates: Vec<CachedTemplate>,
}

impl Store {
    /// Replace the cached templates.
    pub fn cache_templates(&self, key: &str, templates: &[CachedTemplate]) -> Result<(), StateError> {
        let cache = TemplateCache {
            key: key.to_string(),
            templates: templates.to_vec(),
        };
        self.db().set(TEMPLATES_KEY, &cache, "cache templates")?;
        Ok(())
    }

    /// Cached templates and the key they were cached under.
    ///
    /// # Errors
    ///
    /// - [`StateError::NotExist`] if nothing is cached
    pub fn load_cached_templates(&self) -> Result<(String, Vec<CachedTemplate>), StateError> {
        let cache: TemplateCache = self.db().get(TEMPLATES_KEY)?;
        Ok((cache.key, cache.templates))
    }
}
