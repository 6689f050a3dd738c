//! Per-run shared state
//!
//! One `CrawlContext` exists per archive run and is shared by reference
//! between the spawned fetch tasks. It owns the resource table, the claimed
//! set, the frontier and the run's outcome lists.

use std::collections::VecDeque;

use dashmap::DashSet;
use parking_lot::Mutex;
use url::Url;

use super::crawl_types::{ArchiveError, FailedResource, FrontierEntry, PersistedResource};
use crate::archive_path::{ArchiveLayout, ArchivePath, ResourceTable};
use crate::config::ArchiveConfig;
use crate::resource_kind::ResourceKind;

#[derive(Debug, Default)]
pub(crate) struct RunOutcomes {
    pub persisted: Vec<PersistedResource>,
    pub failures: Vec<FailedResource>,
    pub warnings: Vec<String>,
}

pub(crate) struct CrawlContext {
    pub root_url: Url,
    pub config: ArchiveConfig,
    pub layout: ArchiveLayout,
    table: Mutex<ResourceTable>,
    /// URLs that are being or have been processed in this run
    claimed: DashSet<String>,
    frontier: tokio::sync::Mutex<VecDeque<FrontierEntry>>,
    outcomes: Mutex<RunOutcomes>,
}

impl CrawlContext {
    /// Set up a run.
    ///
    /// URLs of a starting table are claimed up front so they are never
    /// fetched again; the root is always processed.
    pub fn new(root_url: Url, config: ArchiveConfig, starting_table: Option<ResourceTable>) -> Self {
        let table = starting_table.unwrap_or_default();
        let claimed = DashSet::new();
        for (url, _) in table.iter() {
            if url != root_url.as_str() {
                claimed.insert(url.to_string());
            }
        }

        Self {
            layout: ArchiveLayout::new(config.download_root()),
            root_url,
            config,
            table: Mutex::new(table),
            claimed,
            frontier: tokio::sync::Mutex::new(VecDeque::new()),
            outcomes: Mutex::new(RunOutcomes::default()),
        }
    }

    /// Atomically mark `url` as taken. Returns false if it already was.
    pub fn claim(&self, url: &str) -> bool {
        self.claimed.insert(url.to_string())
    }

    pub fn is_claimed(&self, url: &str) -> bool {
        self.claimed.contains(url)
    }

    /// Map a reference to its archive path, recording it in the table
    pub fn map(&self, link: &str, url: &Url, hint: Option<ResourceKind>) -> Result<ArchivePath, ArchiveError> {
        self.table.lock().map_url(link, url, hint)
    }

    /// Path of an already-mapped URL
    pub fn mapped_path(&self, url: &Url) -> Option<ArchivePath> {
        self.table.lock().path_for_url(url).cloned()
    }

    /// Whether `url` is the URL fetched for `path`
    pub fn owns(&self, url: &Url, path: &ArchivePath) -> bool {
        self.table.lock().owner_of(path) == Some(url.as_str())
    }

    pub fn table_snapshot(&self) -> ResourceTable {
        self.table.lock().clone()
    }

    pub async fn enqueue(&self, entry: FrontierEntry) {
        log::debug!("Enqueue {} (from {:?})", entry.url, entry.referrer);
        self.frontier.lock().await.push_back(entry);
    }

    pub async fn dequeue(&self) -> Option<FrontierEntry> {
        self.frontier.lock().await.pop_front()
    }

    pub async fn frontier_len(&self) -> usize {
        self.frontier.lock().await.len()
    }

    pub fn record_persisted(&self, resource: PersistedResource) {
        self.outcomes.lock().persisted.push(resource);
    }

    pub fn record_failure(&self, failure: FailedResource) {
        self.outcomes.lock().failures.push(failure);
    }

    pub fn record_warning(&self, warning: String) {
        log::warn!("{warning}");
        self.outcomes.lock().warnings.push(warning);
    }

    /// Like `record_warning`, for conditions that indicate a mapping bug
    pub fn record_error(&self, message: String) {
        log::error!("{message}");
        self.outcomes.lock().warnings.push(message);
    }

    pub fn take_outcomes(&self) -> RunOutcomes {
        std::mem::take(&mut *self.outcomes.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with(table: Option<ResourceTable>) -> CrawlContext {
        let config = ArchiveConfig::builder()
            .download_root("/tmp/archive-context-test")
            .build()
            .unwrap();
        CrawlContext::new(Url::parse("https://example.com/").unwrap(), config, table)
    }

    #[test]
    fn test_claim_is_exclusive() {
        let ctx = context_with(None);
        assert!(ctx.claim("https://example.com/a.css"));
        assert!(!ctx.claim("https://example.com/a.css"));
        assert!(ctx.is_claimed("https://example.com/a.css"));
    }

    #[test]
    fn test_starting_table_is_pre_claimed_except_root() {
        let mut table = ResourceTable::new();
        let root = Url::parse("https://example.com/").unwrap();
        let css = Url::parse("https://example.com/site.css").unwrap();
        table.map_url("https://example.com/", &root, None).unwrap();
        table.map_url("site.css", &css, None).unwrap();

        let ctx = context_with(Some(table));
        assert!(ctx.is_claimed("https://example.com/site.css"));
        assert!(ctx.claim("https://example.com/"));
        assert_eq!(
            ctx.mapped_path(&css).map(|p| p.to_string()),
            Some("example.com/site.css".to_string())
        );
    }

    #[test]
    fn test_only_first_name_of_a_document_owns_its_path() {
        let ctx = context_with(None);
        let root = Url::parse("https://example.com/").unwrap();
        let index = Url::parse("https://example.com/index.html").unwrap();

        let root_path = ctx.map("/", &root, Some(ResourceKind::Html)).unwrap();
        let index_path = ctx.map("/index.html", &index, None).unwrap();

        assert_eq!(root_path, index_path);
        assert!(ctx.owns(&root, &root_path));
        assert!(!ctx.owns(&index, &index_path));
    }

    #[tokio::test]
    async fn test_frontier_is_fifo() {
        let ctx = context_with(None);
        ctx.enqueue(FrontierEntry::root("https://example.com/a")).await;
        ctx.enqueue(FrontierEntry::root("https://example.com/b")).await;

        assert_eq!(ctx.frontier_len().await, 2);
        assert_eq!(ctx.dequeue().await.unwrap().url, "https://example.com/a");
        assert_eq!(ctx.dequeue().await.unwrap().url, "https://example.com/b");
        assert!(ctx.dequeue().await.is_none());
    }
}
