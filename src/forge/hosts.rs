//! forge::hosts
//!
//! Built-in forges recognized by host name.
//!
//! # Supported URL Formats
//!
//! - `git@<host>:owner/repo.git`
//! - `ssh://git@<host>/owner/repo.git`
//! - `https://<host>/owner/repo.git` (also `http://`, with or without `.git`)
//!
//! GitLab groups nest, so everything before the last path segment is the
//! owner.

use super::{Forge, RepoId};

const GITHUB_TEMPLATES: &[&str] = &[
    "PULL_REQUEST_TEMPLATE.md",
    "PULL_REQUEST_TEMPLATE",
    ".github/PULL_REQUEST_TEMPLATE.md",
    ".github/PULL_REQUEST_TEMPLATE",
    "docs/PULL_REQUEST_TEMPLATE.md",
    "docs/PULL_REQUEST_TEMPLATE",
];

const GITLAB_TEMPLATES: &[&str] = &[".gitlab/merge_request_templates"];

const BITBUCKET_TEMPLATES: &[&str] = &[
    "PULL_REQUEST_TEMPLATE.md",
    "pull_request_template.md",
    ".bitbucket/PULL_REQUEST_TEMPLATE.md",
    ".bitbucket/pull_request_template.md",
];

/// A forge identified by the host name in its remote URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostForge {
    id: &'static str,
    host: String,
    templates: &'static [&'static str],
}

impl HostForge {
    /// GitHub at `github.com`.
    pub fn github() -> Self {
        Self::github_at("github.com")
    }

    /// GitHub Enterprise at a custom host.
    pub fn github_at(host: impl Into<String>) -> Self {
        Self {
            id: "github",
            host: host.into(),
            templates: GITHUB_TEMPLATES,
        }
    }

    /// GitLab at `gitlab.com`.
    pub fn gitlab() -> Self {
        Self {
            id: "gitlab",
            host: "gitlab.com".into(),
            templates: GITLAB_TEMPLATES,
        }
    }

    /// Bitbucket Cloud at `bitbucket.org`.
    pub fn bitbucket() -> Self {
        Self {
            id: "bitbucket",
            host: "bitbucket.org".into(),
            templates: BITBUCKET_TEMPLATES,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Forge for HostForge {
    fn id(&self) -> &str {
        self.id
    }

    fn match_url(&self, url: &str) -> Option<RepoId> {
        parse_remote_url(url, &self.host)
    }

    fn change_template_paths(&self) -> &[&'static str] {
        self.templates
    }
}

/// Parse `owner/repo` out of a remote URL pointing at `host`.
pub(crate) fn parse_remote_url(url: &str, host: &str) -> Option<RepoId> {
    let url = url.trim();

    let path = url
        .strip_prefix("git@")
        .and_then(|rest| rest.strip_prefix(host))
        .and_then(|rest| rest.strip_prefix(':'))
        .or_else(|| {
            ["ssh://git@", "https://", "http://"]
                .iter()
                .find_map(|scheme| url.strip_prefix(scheme))
                .and_then(|rest| rest.strip_prefix(host))
                .and_then(|rest| rest.strip_prefix('/'))
        })?;

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (owner, repo) = path.rsplit_once('/')?;
    if owner.is_empty() || repo.is_empty() || owner.split('/').any(str::is_empty) {
        return None;
    }

    Some(RepoId {
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}
