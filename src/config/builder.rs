//! Type-safe builder for `ArchiveConfig` using the typestate pattern
//!
//! `build()` only exists once the download root is set, so a config without
//! one cannot be constructed.

use crate::utils::{
    DEFAULT_FETCH_RATE_RPS, DEFAULT_MAX_CONCURRENT_FETCHES, DEFAULT_MAX_CONCURRENT_PER_DOMAIN,
    DEFAULT_MAX_RESOURCE_BYTES, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};
use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use std::marker::PhantomData;
use std::path::PathBuf;

use super::types::{AnchorPolicy, ArchiveConfig};

/// Compile a glob pattern into a regex
///
/// `*` matches any sequence; every other character matches itself. The
/// pattern is anchored so it has to match the whole URL.
///
/// # Errors
///
/// Returns an error if the resulting regex pattern is invalid.
fn compile_glob_pattern(pattern: &str) -> Result<Regex> {
    let regex_pattern = regex::escape(pattern).replace(r"\*", ".*");
    let anchored = format!("^{regex_pattern}$");
    Regex::new(&anchored).map_err(|e| anyhow!("Invalid glob pattern '{pattern}': {e}"))
}

// Type states for the builder
pub struct WithDownloadRoot;

pub struct ArchiveConfigBuilder<State = ()> {
    pub(crate) download_root: Option<PathBuf>,
    pub(crate) max_concurrent_fetches: usize,
    pub(crate) max_concurrent_per_domain: usize,
    pub(crate) crawl_rate_rps: Option<f64>,
    pub(crate) user_agent: String,
    pub(crate) request_timeout_secs: u64,
    pub(crate) max_resource_bytes: Option<usize>,
    pub(crate) anchor_policy: AnchorPolicy,
    pub(crate) max_anchor_hops: Option<u32>,
    pub(crate) ignore_patterns: Vec<String>,
    pub(crate) cache_dir: Option<PathBuf>,
    pub(crate) cache_max_age_secs: Option<u64>,
    pub(crate) write_manifest: bool,
    pub(crate) _phantom: PhantomData<State>,
}

impl Default for ArchiveConfigBuilder<()> {
    fn default() -> Self {
        Self {
            download_root: None,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            max_concurrent_per_domain: DEFAULT_MAX_CONCURRENT_PER_DOMAIN,
            crawl_rate_rps: Some(DEFAULT_FETCH_RATE_RPS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_resource_bytes: Some(DEFAULT_MAX_RESOURCE_BYTES),
            anchor_policy: AnchorPolicy::Ignore,
            max_anchor_hops: None,
            ignore_patterns: Vec::new(),
            cache_dir: None,
            cache_max_age_secs: None,
            write_manifest: true,
            _phantom: PhantomData,
        }
    }
}

impl ArchiveConfig {
    /// Create a builder for configuring an `ArchiveConfig` with a fluent interface
    #[must_use]
    pub fn builder() -> ArchiveConfigBuilder<()> {
        ArchiveConfigBuilder::default()
    }
}

impl ArchiveConfigBuilder<()> {
    pub fn download_root(self, dir: impl Into<PathBuf>) -> ArchiveConfigBuilder<WithDownloadRoot> {
        ArchiveConfigBuilder {
            download_root: Some(dir.into()),
            max_concurrent_fetches: self.max_concurrent_fetches,
            max_concurrent_per_domain: self.max_concurrent_per_domain,
            crawl_rate_rps: self.crawl_rate_rps,
            user_agent: self.user_agent,
            request_timeout_secs: self.request_timeout_secs,
            max_resource_bytes: self.max_resource_bytes,
            anchor_policy: self.anchor_policy,
            max_anchor_hops: self.max_anchor_hops,
            ignore_patterns: self.ignore_patterns,
            cache_dir: self.cache_dir,
            cache_max_age_secs: self.cache_max_age_secs,
            write_manifest: self.write_manifest,
            _phantom: PhantomData,
        }
    }
}

// Build method only available when the download root is set
impl ArchiveConfigBuilder<WithDownloadRoot> {
    pub fn build(self) -> Result<ArchiveConfig> {
        let download_root = self
            .download_root
            .ok_or_else(|| anyhow!("download_root is required"))?;
        if download_root.as_os_str().is_empty() {
            bail!("download_root must not be empty");
        }
        let download_root = std::path::absolute(&download_root).with_context(|| {
            format!("Failed to make download root absolute: {}", download_root.display())
        })?;

        if !(1..=100).contains(&self.max_concurrent_fetches) {
            bail!(
                "max_concurrent_fetches must be between 1 and 100, got {}",
                self.max_concurrent_fetches
            );
        }
        if !(1..=32).contains(&self.max_concurrent_per_domain) {
            bail!(
                "max_concurrent_per_domain must be between 1 and 32, got {}",
                self.max_concurrent_per_domain
            );
        }
        if let Some(rate) = self.crawl_rate_rps
            && !(rate.is_finite() && rate > 0.0)
        {
            bail!("crawl_rate_rps must be a positive number, got {rate}");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        if self.max_resource_bytes == Some(0) {
            bail!("max_resource_bytes must be greater than zero");
        }

        // Compile ignore patterns once at config creation
        let ignore_patterns_compiled = self
            .ignore_patterns
            .iter()
            .map(|p| compile_glob_pattern(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(ArchiveConfig {
            download_root,
            max_concurrent_fetches: self.max_concurrent_fetches,
            max_concurrent_per_domain: self.max_concurrent_per_domain,
            crawl_rate_rps: self.crawl_rate_rps,
            user_agent: self.user_agent,
            request_timeout_secs: self.request_timeout_secs,
            max_resource_bytes: self.max_resource_bytes,
            anchor_policy: self.anchor_policy,
            max_anchor_hops: self.max_anchor_hops,
            ignore_patterns: self.ignore_patterns,
            ignore_patterns_compiled,
            cache_dir: self.cache_dir,
            cache_max_age_secs: self.cache_max_age_secs,
            write_manifest: self.write_manifest,
        })
    }
}

// Builder methods available at any state
impl<State> ArchiveConfigBuilder<State> {
    /// Maximum resources fetched at once across all hosts (1-100)
    #[must_use]
    pub fn max_concurrent_fetches(mut self, n: usize) -> Self {
        self.max_concurrent_fetches = n;
        self
    }

    /// Maximum resources fetched at once from one host (1-32)
    #[must_use]
    pub fn max_concurrent_per_domain(mut self, n: usize) -> Self {
        self.max_concurrent_per_domain = n;
        self
    }

    /// Per-domain request rate; `None` disables rate limiting
    ///
    /// # Example
    /// ```rust
    /// # use kodegen_tools_webarchive::config::ArchiveConfig;
    /// # fn main() -> anyhow::Result<()> {
    /// let config = ArchiveConfig::builder()
    ///     .download_root("./archive")
    ///     .crawl_rate_rps(Some(2.0)) // polite archiving of a small site
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn crawl_rate_rps(mut self, rate: Option<f64>) -> Self {
        self.crawl_rate_rps = rate;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Largest payload accepted for a single resource; `None` for no limit
    #[must_use]
    pub fn max_resource_bytes(mut self, bytes: Option<usize>) -> Self {
        self.max_resource_bytes = bytes;
        self
    }

    #[must_use]
    pub fn anchor_policy(mut self, policy: AnchorPolicy) -> Self {
        self.anchor_policy = policy;
        self
    }

    /// Maximum number of anchor links followed from the root page
    #[must_use]
    pub fn max_anchor_hops(mut self, hops: Option<u32>) -> Self {
        self.max_anchor_hops = hops;
        self
    }

    /// URLs matching any of these globs are not archived
    ///
    /// # Example
    /// ```rust
    /// # use kodegen_tools_webarchive::config::ArchiveConfig;
    /// # fn main() -> anyhow::Result<()> {
    /// let config = ArchiveConfig::builder()
    ///     .download_root("./archive")
    ///     .ignore_patterns(vec!["*.mp4".to_string(), "https://ads.example.com/*".to_string()])
    ///     .build()?;
    /// assert!(config.is_ignored("https://example.com/intro.mp4"));
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Persist fetched payloads under `dir` and reuse them in later runs
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Entries older than this are fetched again
    #[must_use]
    pub fn cache_max_age_secs(mut self, secs: Option<u64>) -> Self {
        self.cache_max_age_secs = secs;
        self
    }

    #[must_use]
    pub fn write_manifest(mut self, enabled: bool) -> Self {
        self.write_manifest = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let re = compile_glob_pattern("https://example.com/*.php?id=*").unwrap();
        assert!(re.is_match("https://example.com/view.php?id=42"));
        assert!(!re.is_match("https://exampleXcom/view.php?id=42"));
        assert!(!re.is_match("https://example.com/view.phpid=42"));
    }

    #[test]
    fn test_relative_download_root_becomes_absolute() {
        let config = ArchiveConfig::builder()
            .download_root("archive-out")
            .build()
            .unwrap();
        assert!(config.download_root().is_absolute());
        assert!(config.download_root().ends_with("archive-out"));
    }
}
