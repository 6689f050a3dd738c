//! Core types for archive runs.
//!
//! Error types, the frontier entry shape and the result handed back to
//! callers once a run finishes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive_path::{ArchivePath, ResourceTable};
use crate::fetch_cache::FetchError;
use crate::resource_kind::ResourceKind;

/// Errors surfaced by archive operations
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ArchiveError {
    /// A relative link was given without the page it came from
    #[error("relative link `{link}` cannot be resolved without a page URL")]
    InvalidArgument { link: String },

    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Two different URLs mapped to the same archive path
    #[error("archive path `{path}` is already used by {existing}, cannot store {incoming}")]
    PathCollision {
        path: String,
        existing: String,
        incoming: String,
    },

    #[error("I/O error at {path}: {message}")]
    Io { path: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("archive run was cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for ArchiveError {
    fn from(err: anyhow::Error) -> Self {
        // Use {:#} to preserve full error chain with context
        Self::Other(format!("{err:#}"))
    }
}

/// A resource waiting to be fetched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierEntry {
    /// Absolute URL, fragment removed
    pub url: String,
    /// URL of the document that referenced it, `None` for the root
    #[serde(default)]
    pub referrer: Option<String>,
    /// What the referencing context expects the resource to be
    #[serde(default)]
    pub hint: Option<ResourceKind>,
    /// Number of `<a>`/`<area>` links followed to reach this entry
    #[serde(default)]
    pub anchor_hops: u32,
}

impl FrontierEntry {
    #[must_use]
    pub fn root(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            referrer: None,
            hint: Some(ResourceKind::Html),
            anchor_hops: 0,
        }
    }
}

/// A resource written to the archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedResource {
    pub url: String,
    pub path: ArchivePath,
    pub kind: ResourceKind,
    /// Size of the written file after any rewriting
    pub bytes: u64,
}

/// A resource that could not be archived
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedResource {
    pub url: String,
    #[serde(default)]
    pub referrer: Option<String>,
    pub reason: String,
}

/// Outcome of a completed archive run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveResult {
    pub root_url: String,
    /// Archive path of the root page, relative to the download root
    pub root_path: ArchivePath,
    /// Every URL that was mapped during the run
    pub resources: ResourceTable,
    pub persisted: Vec<PersistedResource>,
    pub failures: Vec<FailedResource>,
    /// Non-fatal oddities such as unparseable documents stored verbatim
    pub warnings: Vec<String>,
    /// Run stopped early; the archive may be incomplete
    pub cancelled: bool,
}

impl ArchiveResult {
    /// Whether every discovered resource was archived
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }

    #[must_use]
    pub fn persisted_path(&self, url: &str) -> Option<&ArchivePath> {
        self.persisted
            .iter()
            .find(|r| r.url == url)
            .map(|r| &r.path)
    }
}
