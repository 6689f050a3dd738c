//! The archive crawl loop
//!
//! The root page is processed inline so that its failure can be returned to
//! the caller. Everything it references is then drained from the frontier by
//! concurrent tasks, bounded globally and per host.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use url::Url;

use super::cancel::CancelHandle;
use super::context::CrawlContext;
use super::crawl_types::{ArchiveError, ArchiveResult, FailedResource, FrontierEntry, PersistedResource};
use super::domain_limiter::DomainLimiter;
use super::progress::{NoOpProgress, ProgressReporter};
use crate::archive_path::{ArchivePath, ResourceTable, get_relative_url};
use crate::config::ArchiveConfig;
use crate::content_saver::{self, ArchiveManifest};
use crate::fetch_cache::{FetchCache, HttpFetchCache};
use crate::link_rewriter::{
    RawReference, Replacements, RewriteError, extract_css_references, extract_html_references,
    rewrite_css, rewrite_html,
};
use crate::resource_kind::{ResourceKind, classify};
use crate::utils::resolve_link;

/// Archives a page and everything it needs into a local directory tree.
///
/// ```rust,no_run
/// # use kodegen_tools_webarchive::{ArchiveDownloader, config::ArchiveConfig};
/// # async fn run() -> anyhow::Result<()> {
/// let config = ArchiveConfig::builder().download_root("./archive").build()?;
/// let result = ArchiveDownloader::new(config)?
///     .archive("https://example.com/")
///     .await?;
/// println!("open ./archive/{}", result.root_path);
/// # Ok(())
/// # }
/// ```
pub struct ArchiveDownloader<F = HttpFetchCache, P = NoOpProgress> {
    config: ArchiveConfig,
    fetcher: Arc<F>,
    progress: Arc<P>,
    cancel: CancelHandle,
    starting_table: Option<ResourceTable>,
}

impl ArchiveDownloader {
    /// Downloader backed by an [`HttpFetchCache`] built from `config`.
    ///
    /// # Errors
    ///
    /// `Config` if the HTTP client cannot be built.
    pub fn new(config: ArchiveConfig) -> Result<Self, ArchiveError> {
        let mut fetcher = HttpFetchCache::new(config.fetch_settings())
            .map_err(|e| ArchiveError::Config(format!("{e:#}")))?;
        if let Some(store) = config.persistent_store() {
            debug!("Using persistent fetch cache at {}", store.dir().display());
            fetcher = fetcher.with_store(store);
        }

        Ok(Self {
            config,
            fetcher: Arc::new(fetcher),
            progress: Arc::new(NoOpProgress),
            cancel: CancelHandle::new(),
            starting_table: None,
        })
    }
}

impl<F, P> ArchiveDownloader<F, P>
where
    F: FetchCache + 'static,
    P: ProgressReporter + 'static,
{
    /// Replace the fetch cache, e.g. to share one between runs
    #[must_use]
    pub fn with_fetcher<G: FetchCache + 'static>(self, fetcher: Arc<G>) -> ArchiveDownloader<G, P> {
        ArchiveDownloader {
            config: self.config,
            fetcher,
            progress: self.progress,
            cancel: self.cancel,
            starting_table: self.starting_table,
        }
    }

    #[must_use]
    pub fn with_progress<Q: ProgressReporter + 'static>(self, progress: Q) -> ArchiveDownloader<F, Q> {
        ArchiveDownloader {
            config: self.config,
            fetcher: self.fetcher,
            progress: Arc::new(progress),
            cancel: self.cancel,
            starting_table: self.starting_table,
        }
    }

    /// Start from the table of an earlier run.
    ///
    /// Its URLs count as already archived: they are not fetched again and
    /// references to them point at their recorded paths.
    #[must_use]
    pub fn with_resource_table(mut self, table: ResourceTable) -> Self {
        self.starting_table = Some(table);
        self
    }

    #[must_use]
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that stops runs of this downloader
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    #[must_use]
    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }

    #[must_use]
    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Archive `root_url` and every resource reachable from it.
    ///
    /// # Errors
    ///
    /// Only failures of the root itself end the run with an error: an
    /// invalid root URL, a failed root fetch or write, or cancellation before
    /// the root was archived. Everything else is reported in the result.
    pub async fn archive(&self, root_url: &str) -> Result<ArchiveResult, ArchiveError> {
        let (root, _fragment) = resolve_link(root_url, None)?;
        let ctx = Arc::new(CrawlContext::new(
            root.clone(),
            self.config.clone(),
            self.starting_table.clone(),
        ));

        ctx.claim(root.as_str());
        let root_path = ctx.map(root_url, &root, Some(ResourceKind::Html))?;

        self.progress.report_started(root.as_str());
        if self.cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }

        let domain_limiter = Arc::new(DomainLimiter::new(self.config.max_concurrent_per_domain()));
        let root_outcome = {
            let _domain_permit = domain_limiter.acquire_for_url(root.as_str()).await;
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ArchiveError::Cancelled),
                outcome = process_entry(&ctx, self.fetcher.as_ref(), FrontierEntry::root(root.as_str())) => outcome,
            }
        };
        match root_outcome {
            Ok(resource) => {
                self.progress
                    .report_resource_archived(&resource.url, &resource.path, resource.kind);
                ctx.record_persisted(resource);
            }
            Err(e) => {
                self.progress.report_resource_failed(root.as_str(), &e.to_string());
                return Err(e);
            }
        }

        let cancelled = self.drain_frontier(&ctx, domain_limiter).await;

        let resources = ctx.table_snapshot();
        let mut outcomes = ctx.take_outcomes();

        if self.config.write_manifest() {
            let manifest = ArchiveManifest {
                root_url: root.to_string(),
                root_path: root_path.clone(),
                created_at: Utc::now(),
                resources: resources.clone(),
                failures: outcomes.failures.clone(),
            };
            if let Err(e) = content_saver::write_manifest(self.config.download_root(), &manifest).await
            {
                let warning = format!("Failed to write archive manifest: {e:#}");
                warn!("{warning}");
                outcomes.warnings.push(warning);
            }
        }

        self.progress
            .report_completed(outcomes.persisted.len(), outcomes.failures.len());
        info!(
            "Archived {} into {} ({} resources, {} failed{})",
            root,
            self.config.download_root().display(),
            outcomes.persisted.len(),
            outcomes.failures.len(),
            if cancelled { ", cancelled" } else { "" }
        );

        Ok(ArchiveResult {
            root_url: root.to_string(),
            root_path,
            resources,
            persisted: outcomes.persisted,
            failures: outcomes.failures,
            warnings: outcomes.warnings,
            cancelled,
        })
    }

    /// Process the frontier until it is empty. Returns whether the run was
    /// cancelled on the way.
    async fn drain_frontier(&self, ctx: &Arc<CrawlContext>, domain_limiter: Arc<DomainLimiter>) -> bool {
        let concurrency = self.config.max_concurrent_fetches();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut active_tasks = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            // Fill up to concurrency limit
            while active_tasks.len() < concurrency {
                if self.cancel.is_cancelled() {
                    if !cancelled {
                        info!(
                            "Archive run cancelled, {} queued resources dropped",
                            ctx.frontier_len().await
                        );
                    }
                    cancelled = true;
                    break;
                }

                let Some(entry) = ctx.dequeue().await else {
                    break;
                };
                if !ctx.claim(&entry.url) {
                    continue;
                }

                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    error!("Semaphore closed unexpectedly");
                    break;
                };

                let ctx = Arc::clone(ctx);
                let fetcher = Arc::clone(&self.fetcher);
                let progress = Arc::clone(&self.progress);
                let domain_limiter = Arc::clone(&domain_limiter);

                active_tasks.push(tokio::spawn(async move {
                    let _permit = permit;
                    let _domain_permit = domain_limiter.acquire_for_url(&entry.url).await;

                    let url = entry.url.clone();
                    let referrer = entry.referrer.clone();
                    match process_entry(&ctx, fetcher.as_ref(), entry).await {
                        Ok(resource) => {
                            progress.report_resource_archived(&resource.url, &resource.path, resource.kind);
                            ctx.record_persisted(resource);
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            progress.report_resource_failed(&url, &reason);
                            ctx.record_failure(FailedResource { url, referrer, reason });
                        }
                    }
                }));
            }

            // Wait for at least one task to complete
            match active_tasks.next().await {
                Some(Ok(())) => {}
                Some(Err(e)) => error!("Archive task panicked: {e}"),
                None => break,
            }
        }

        cancelled
    }
}

/// Archive `root_url` into `download_root` with default settings.
///
/// # Errors
///
/// See [`ArchiveDownloader::archive`]. An unusable download root is a
/// `Config` error.
pub async fn archive(root_url: &str, download_root: impl Into<PathBuf>) -> Result<ArchiveResult, ArchiveError> {
    let config = ArchiveConfig::builder()
        .download_root(download_root)
        .build()
        .map_err(|e| ArchiveError::Config(format!("{e:#}")))?;
    ArchiveDownloader::new(config)?.archive(root_url).await
}

/// Fetch, rewrite and persist one resource.
async fn process_entry<F: FetchCache + ?Sized>(
    ctx: &CrawlContext,
    fetcher: &F,
    entry: FrontierEntry,
) -> Result<PersistedResource, ArchiveError> {
    let url = Url::parse(&entry.url).map_err(|e| ArchiveError::InvalidUrl {
        url: entry.url.clone(),
        reason: e.to_string(),
    })?;
    let path = match ctx.mapped_path(&url) {
        Some(path) => path,
        None => ctx.map(&entry.url, &url, entry.hint)?,
    };

    let fetched = fetcher.fetch(url.as_str()).await?;
    let kind = classify(&url, fetched.content_type.as_deref());
    debug!("Fetched {} as {kind} ({} bytes)", url, fetched.bytes.len());

    // References resolve against where the payload was served from
    let location = match fetched.final_url.as_deref().map(Url::parse) {
        Some(Ok(final_url)) => {
            debug!("{url} was redirected to {final_url}");
            final_url
        }
        _ => url.clone(),
    };

    let (stored, stored_kind): (Cow<'_, [u8]>, ResourceKind) = match kind {
        ResourceKind::Html => match process_html(ctx, &entry, &location, &path, &fetched.bytes).await {
            Ok(html) => (Cow::Owned(html), ResourceKind::Html),
            Err(e) => {
                ctx.record_warning(format!("Storing {url} unmodified, HTML could not be processed: {e}"));
                (Cow::Borrowed(fetched.bytes.as_slice()), ResourceKind::Opaque)
            }
        },
        ResourceKind::Css => match std::str::from_utf8(&fetched.bytes) {
            Ok(css) => {
                let references = extract_css_references(css);
                let replacements = resolve_references(ctx, &entry, &location, &path, &references, false).await;
                (Cow::Owned(rewrite_css(css, &replacements).into_bytes()), ResourceKind::Css)
            }
            Err(e) => {
                ctx.record_warning(format!("Storing {url} unmodified, stylesheet is not UTF-8: {e}"));
                (Cow::Borrowed(fetched.bytes.as_slice()), ResourceKind::Opaque)
            }
        },
        ResourceKind::Opaque => (Cow::Borrowed(fetched.bytes.as_slice()), ResourceKind::Opaque),
    };

    let saved = content_saver::save_resource(ctx.layout.download_root(), &path, &stored).await;
    fetcher.release(url.as_str());
    saved.map_err(|e| ArchiveError::Io {
        path: path.to_string(),
        message: format!("{e:#}"),
    })?;

    Ok(PersistedResource {
        url: entry.url,
        path,
        kind: stored_kind,
        bytes: stored.len() as u64,
    })
}

async fn process_html(
    ctx: &CrawlContext,
    entry: &FrontierEntry,
    url: &Url,
    path: &ArchivePath,
    body: &[u8],
) -> Result<Vec<u8>, RewriteError> {
    let scan = extract_html_references(body)?;

    // `<base>` is dropped on rewrite, so its effect is applied here
    let base = scan
        .base_href
        .as_deref()
        .and_then(|href| url.join(html_escape::decode_html_entities(href).trim()).ok())
        .filter(|base| matches!(base.scheme(), "http" | "https"))
        .unwrap_or_else(|| url.clone());

    let replacements = resolve_references(ctx, entry, &base, path, &scan.references, true).await;
    rewrite_html(body, &replacements)
}

/// Resolve each reference of a document, map it and queue what still has to
/// be fetched. Returns the replacement text per reference as written.
async fn resolve_references(
    ctx: &CrawlContext,
    entry: &FrontierEntry,
    base: &Url,
    document_path: &ArchivePath,
    references: &[RawReference],
    decode_entities: bool,
) -> Replacements {
    let mut replacements = Replacements::new();
    let mut discovered = Vec::new();

    // Embedded references first: an anchor sharing the raw text of an image
    // must not decide its replacement before the image is mapped
    let ordered = references
        .iter()
        .filter(|r| !r.navigational)
        .chain(references.iter().filter(|r| r.navigational));

    for reference in ordered {
        if replacements.contains_key(&reference.raw) {
            continue;
        }

        let spelled = if decode_entities {
            html_escape::decode_html_entities(&reference.raw).into_owned()
        } else {
            reference.raw.clone()
        };
        let (target, fragment) = match resolve_link(&spelled, Some(base.as_str())) {
            Ok(resolved) => resolved,
            Err(e) => {
                ctx.record_warning(format!("Leaving reference `{}` in {} as is: {e}", reference.raw, entry.url));
                continue;
            }
        };
        let with_fragment = |s: String| match &fragment {
            Some(fragment) => format!("{s}#{fragment}"),
            None => s,
        };

        if ctx.config.is_ignored(target.as_str()) {
            replacements.insert(reference.raw.clone(), with_fragment(target.to_string()));
            continue;
        }

        let anchor_hops = entry.anchor_hops + u32::from(reference.navigational);
        if reference.navigational
            && !(ctx.config.anchor_policy().allows(&ctx.root_url, &target)
                && ctx.config.within_anchor_hops(anchor_hops))
        {
            let replacement = match ctx.mapped_path(&target) {
                Some(local) => get_relative_url(local.as_str(), document_path.as_str()),
                None => target.to_string(),
            };
            replacements.insert(reference.raw.clone(), with_fragment(replacement));
            continue;
        }

        match ctx.map(&spelled, &target, reference.hint) {
            Ok(target_path) => {
                let relative = get_relative_url(target_path.as_str(), document_path.as_str());
                replacements.insert(reference.raw.clone(), with_fragment(relative));
                if !ctx.owns(&target, &target_path) {
                    // Another name of an already mapped document
                    ctx.claim(target.as_str());
                } else if !ctx.is_claimed(target.as_str()) {
                    discovered.push(FrontierEntry {
                        url: target.to_string(),
                        referrer: Some(entry.url.clone()),
                        hint: reference.hint,
                        anchor_hops,
                    });
                }
            }
            Err(e) => {
                ctx.record_error(format!("Not archiving {target} referenced from {}: {e}", entry.url));
                replacements.insert(reference.raw.clone(), with_fragment(target.to_string()));
            }
        }
    }

    for entry in discovered {
        ctx.enqueue(entry).await;
    }
    replacements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnchorPolicy;
    use crate::fetch_cache::{FetchError, FetchFuture, FetchedResource};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// In-memory site; unknown URLs answer 404
    #[derive(Default)]
    struct StaticSite {
        pages: HashMap<String, (&'static str, Vec<u8>)>,
        requests: AtomicUsize,
    }

    impl StaticSite {
        fn with(mut self, url: &str, content_type: &'static str, body: &str) -> Self {
            self.pages
                .insert(url.to_string(), (content_type, body.as_bytes().to_vec()));
            self
        }
    }

    impl FetchCache for StaticSite {
        fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
            Box::pin(async move {
                self.requests.fetch_add(1, Ordering::SeqCst);
                match self.pages.get(url) {
                    Some((content_type, body)) => Ok(Arc::new(FetchedResource {
                        url: url.to_string(),
                        final_url: None,
                        bytes: body.clone(),
                        content_type: Some((*content_type).to_string()),
                        fetched_at: Utc::now(),
                    })),
                    None => Err(FetchError::Status {
                        url: url.to_string(),
                        status: 404,
                    }),
                }
            })
        }
    }

    fn downloader(dir: &TempDir, site: StaticSite) -> ArchiveDownloader<StaticSite> {
        let config = ArchiveConfig::builder()
            .download_root(dir.path())
            .crawl_rate_rps(None)
            .build()
            .unwrap();
        ArchiveDownloader::new(config).unwrap().with_fetcher(Arc::new(site))
    }

    fn read(dir: &TempDir, path: &str) -> String {
        std::fs::read_to_string(dir.path().join(path)).unwrap()
    }

    #[tokio::test]
    async fn test_page_stylesheet_and_font_are_archived() {
        let dir = TempDir::new().unwrap();
        let site = StaticSite::default()
            .with(
                "https://example.com/",
                "text/html; charset=utf-8",
                r#"<html><head><link rel="stylesheet" href="/static/site.css?v=2"></head>
<body><img src="logo.png"></body></html>"#,
            )
            .with(
                "https://example.com/static/site.css?v=2",
                "text/css",
                r#"@font-face { src: url("https://cdn.example.net/a.woff2"); }"#,
            )
            .with("https://example.com/logo.png", "image/png", "PNG")
            .with("https://cdn.example.net/a.woff2", "font/woff2", "WOFF");

        let result = downloader(&dir, site).archive("https://example.com/").await.unwrap();

        assert!(result.is_complete(), "{:?}", result.failures);
        assert_eq!(result.root_path, "example.com/index.html");
        assert_eq!(result.persisted.len(), 4);

        let html = read(&dir, "example.com/index.html");
        assert!(html.contains(r#"href="static/site_v_2.css""#), "{html}");
        assert!(html.contains(r#"src="logo.png""#), "{html}");

        let css = read(&dir, "example.com/static/site_v_2.css");
        assert!(css.contains("../../cdn.example.net/a.woff2"), "{css}");
        assert_eq!(read(&dir, "cdn.example.net/a.woff2"), "WOFF");
        assert!(dir.path().join(crate::utils::MANIFEST_FILENAME).exists());
    }

    #[tokio::test]
    async fn test_nested_failure_is_recorded_and_keeps_local_reference() {
        let dir = TempDir::new().unwrap();
        let site = StaticSite::default().with(
            "https://example.com/",
            "text/html",
            r#"<img src="img/missing.png">"#,
        );

        let result = downloader(&dir, site).archive("https://example.com/").await.unwrap();

        assert!(!result.is_complete());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].url, "https://example.com/img/missing.png");
        assert_eq!(result.failures[0].referrer.as_deref(), Some("https://example.com/"));
        assert!(read(&dir, "example.com/index.html").contains(r#"src="img/missing.png""#));
    }

    #[tokio::test]
    async fn test_root_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = downloader(&dir, StaticSite::default())
            .archive("https://example.com/")
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Fetch(FetchError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_cancel_before_root_completes() {
        let dir = TempDir::new().unwrap();
        let site = StaticSite::default().with("https://example.com/", "text/html", "<p>hi</p>");
        let downloader = downloader(&dir, site);
        downloader.cancel_handle().cancel();

        let err = downloader.archive("https://example.com/").await.unwrap_err();
        assert!(matches!(err, ArchiveError::Cancelled));
    }

    #[tokio::test]
    async fn test_anchors_are_absolute_unless_followed() {
        let dir = TempDir::new().unwrap();
        let site = StaticSite::default()
            .with(
                "https://example.com/",
                "text/html",
                r##"<a href="/about#team">About</a>"##,
            )
            .with("https://example.com/about", "text/html", "<p>about</p>");

        let result = downloader(&dir, site).archive("https://example.com/").await.unwrap();
        assert_eq!(result.persisted.len(), 1);
        assert!(read(&dir, "example.com/index.html").contains(r#"href="https://example.com/about#team""#));

        let dir = TempDir::new().unwrap();
        let site = StaticSite::default()
            .with(
                "https://example.com/",
                "text/html",
                r##"<a href="/about#team">About</a>"##,
            )
            .with("https://example.com/about", "text/html", "<p>about</p>");
        let config = ArchiveConfig::builder()
            .download_root(dir.path())
            .anchor_policy(AnchorPolicy::SameHost)
            .build()
            .unwrap();
        let result = ArchiveDownloader::new(config)
            .unwrap()
            .with_fetcher(Arc::new(site))
            .archive("https://example.com/")
            .await
            .unwrap();

        assert_eq!(result.persisted.len(), 2);
        assert!(read(&dir, "example.com/index.html").contains(r#"href="about/index.html#team""#));
        assert_eq!(read(&dir, "example.com/about/index.html"), "<p>about</p>");
    }

    #[tokio::test]
    async fn test_shared_resource_is_fetched_once() {
        let dir = TempDir::new().unwrap();
        let site = StaticSite::default()
            .with(
                "https://example.com/",
                "text/html",
                r#"<link rel="stylesheet" href="a.css"><link rel="stylesheet" href="b.css">"#,
            )
            .with("https://example.com/a.css", "text/css", "x { background: url(shared.png) }")
            .with("https://example.com/b.css", "text/css", "y { background: url(./shared.png) }")
            .with("https://example.com/shared.png", "image/png", "PNG");
        let downloader = downloader(&dir, site);

        let result = downloader.archive("https://example.com/").await.unwrap();

        assert!(result.is_complete());
        assert_eq!(result.persisted.len(), 4);
        assert_eq!(downloader.fetcher().requests.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_starting_table_entries_are_not_refetched() {
        let dir = TempDir::new().unwrap();
        let mut table = ResourceTable::new();
        let css = Url::parse("https://example.com/site.css").unwrap();
        table
            .insert(css.as_str(), crate::archive_path::archive_path_for_url(&css, None).unwrap())
            .unwrap();

        let site = StaticSite::default().with(
            "https://example.com/",
            "text/html",
            r#"<link rel="stylesheet" href="site.css">"#,
        );
        let downloader = downloader(&dir, site).with_resource_table(table);

        let result = downloader.archive("https://example.com/").await.unwrap();

        assert!(result.is_complete());
        assert_eq!(downloader.fetcher().requests.load(Ordering::SeqCst), 1);
        assert!(result.resources.contains_url("https://example.com/site.css"));
        assert!(read(&dir, "example.com/index.html").contains(r#"href="site.css""#));
    }
}
