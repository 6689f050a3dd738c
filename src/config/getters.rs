//! Accessors and derived settings for `ArchiveConfig`

use std::path::Path;
use std::time::Duration;

use super::types::{AnchorPolicy, ArchiveConfig};
use crate::fetch_cache::{FetchSettings, PersistentStore};

impl ArchiveConfig {
    #[must_use]
    pub fn download_root(&self) -> &Path {
        &self.download_root
    }

    #[must_use]
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_concurrent_fetches
    }

    #[must_use]
    pub fn max_concurrent_per_domain(&self) -> usize {
        self.max_concurrent_per_domain
    }

    #[must_use]
    pub fn crawl_rate_rps(&self) -> Option<f64> {
        self.crawl_rate_rps
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn max_resource_bytes(&self) -> Option<usize> {
        self.max_resource_bytes
    }

    #[must_use]
    pub fn anchor_policy(&self) -> AnchorPolicy {
        self.anchor_policy
    }

    #[must_use]
    pub fn max_anchor_hops(&self) -> Option<u32> {
        self.max_anchor_hops
    }

    #[must_use]
    pub fn ignore_patterns(&self) -> &[String] {
        &self.ignore_patterns
    }

    #[must_use]
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    #[must_use]
    pub fn write_manifest(&self) -> bool {
        self.write_manifest
    }

    /// Whether `url` matches one of the ignore patterns
    #[must_use]
    pub fn is_ignored(&self, url: &str) -> bool {
        self.ignore_patterns_compiled.iter().any(|re| re.is_match(url))
    }

    /// Whether an anchor reached after `hops` anchor links may be followed
    #[must_use]
    pub fn within_anchor_hops(&self, hops: u32) -> bool {
        self.max_anchor_hops.is_none_or(|max| hops <= max)
    }

    /// Network settings for the HTTP fetch cache
    #[must_use]
    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            user_agent: self.user_agent.clone(),
            request_timeout: self.request_timeout(),
            max_resource_bytes: self.max_resource_bytes.unwrap_or(usize::MAX),
            rate_rps: self.crawl_rate_rps,
        }
    }

    /// On-disk store backing the fetch cache, when `cache_dir` is set
    #[must_use]
    pub fn persistent_store(&self) -> Option<PersistentStore> {
        self.cache_dir.as_ref().map(|dir| {
            PersistentStore::new(dir, self.cache_max_age_secs.map(Duration::from_secs))
        })
    }
}
