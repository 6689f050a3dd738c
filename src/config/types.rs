//! Core configuration types for archive runs
//!
//! This module contains the `ArchiveConfig` struct and the anchor policy
//! that decides which `<a>` links are followed.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Which `<a href>`/`<area href>` targets are archived.
///
/// Embedded resources (images, stylesheets, scripts, frames) are always
/// archived; this only governs navigation links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPolicy {
    /// Never follow anchors; they are rewritten to absolute URLs
    #[default]
    Ignore,
    /// Follow anchors whose host and port match the root page
    SameHost,
    /// Follow every http(s) anchor
    AnyHost,
}

impl AnchorPolicy {
    /// Whether an anchor from the run rooted at `root` to `target` is followed
    #[must_use]
    pub fn allows(self, root: &Url, target: &Url) -> bool {
        match self {
            Self::Ignore => false,
            Self::SameHost => {
                root.host_str() == target.host_str()
                    && root.port_or_known_default() == target.port_or_known_default()
            }
            Self::AnyHost => true,
        }
    }
}

/// Main configuration struct for archive runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Directory that receives the archive.
    ///
    /// Always absolute (normalized in builder).
    pub(crate) download_root: PathBuf,
    pub(crate) max_concurrent_fetches: usize,
    pub(crate) max_concurrent_per_domain: usize,
    pub(crate) crawl_rate_rps: Option<f64>,
    pub(crate) user_agent: String,
    pub(crate) request_timeout_secs: u64,
    pub(crate) max_resource_bytes: Option<usize>,
    pub(crate) anchor_policy: AnchorPolicy,
    pub(crate) max_anchor_hops: Option<u32>,
    pub(crate) ignore_patterns: Vec<String>,

    /// Compiled regex patterns from `ignore_patterns`
    /// Pre-compiled at config creation to avoid hot-path regex compilation
    #[serde(skip)]
    pub(crate) ignore_patterns_compiled: Vec<regex::Regex>,

    pub(crate) cache_dir: Option<PathBuf>,
    pub(crate) cache_max_age_secs: Option<u64>,
    pub(crate) write_manifest: bool,
}
