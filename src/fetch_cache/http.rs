//! HTTP-backed fetch cache with request coalescing
//!
//! Concurrent callers for the same URL are coalesced onto one request through
//! a `watch` channel held in the in-flight table. Completed outcomes stay in a
//! response cache; failures for the lifetime of the instance, payloads until
//! the caller releases them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::watch;

use super::{FetchCache, FetchError, FetchFuture, FetchedResource, PersistentStore, cache_key};
use crate::crawl_engine::rate_limiter::CrawlRateLimiter;
use crate::utils::constants::{
    DEFAULT_FETCH_RATE_RPS, DEFAULT_MAX_RESOURCE_BYTES, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_USER_AGENT,
};

/// Network settings for [`HttpFetchCache`]
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Largest accepted payload in bytes
    pub max_resource_bytes: usize,
    /// Per-domain requests per second, `None` to disable
    pub rate_rps: Option<f64>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_resource_bytes: DEFAULT_MAX_RESOURCE_BYTES,
            rate_rps: Some(DEFAULT_FETCH_RATE_RPS),
        }
    }
}

/// Cached response type - stores either the payload or the failure
#[derive(Debug, Clone)]
enum CachedResponse {
    Success(Arc<FetchedResource>),
    Error(FetchError),
}

impl CachedResponse {
    fn to_result(&self) -> Result<Arc<FetchedResource>, FetchError> {
        match self {
            Self::Success(resource) => Ok(Arc::clone(resource)),
            Self::Error(err) => Err(err.clone()),
        }
    }
}

/// In-flight fetch result shared between concurrent callers
type InFlightResult = Option<Result<Arc<FetchedResource>, FetchError>>;

/// Removes the in-flight entry when the leading request ends, even if its
/// future is dropped before completing.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<String, watch::Sender<InFlightResult>>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// [`FetchCache`] that reads from the network through `reqwest`
pub struct HttpFetchCache {
    client: Client,
    settings: FetchSettings,
    responses: DashMap<String, CachedResponse>,
    in_flight: DashMap<String, watch::Sender<InFlightResult>>,
    rate_limiter: CrawlRateLimiter,
    store: Option<PersistentStore>,
    network_requests: AtomicUsize,
}

impl HttpFetchCache {
    /// Build a cache with its own HTTP client.
    pub fn new(settings: FetchSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;
        Ok(Self::with_client(client, settings))
    }

    /// Build a cache around an existing client.
    #[must_use]
    pub fn with_client(client: Client, settings: FetchSettings) -> Self {
        Self {
            client,
            settings,
            responses: DashMap::new(),
            in_flight: DashMap::new(),
            rate_limiter: CrawlRateLimiter::new(),
            store: None,
            network_requests: AtomicUsize::new(0),
        }
    }

    /// Back the cache with an on-disk store shared across runs.
    #[must_use]
    pub fn with_store(mut self, store: PersistentStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Number of requests that actually went to the network
    #[must_use]
    pub fn network_requests(&self) -> usize {
        self.network_requests.load(Ordering::Relaxed)
    }

    /// Number of URLs with a stored outcome
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.responses.len()
    }

    fn cached(&self, key: &str) -> Option<Result<Arc<FetchedResource>, FetchError>> {
        self.responses.get(key).map(|hit| {
            log::debug!("[CACHE-HIT] {key}");
            hit.value().to_result()
        })
    }

    async fn fetch_coalesced(&self, url: &str) -> Result<Arc<FetchedResource>, FetchError> {
        let key = cache_key(url);

        if let Some(hit) = self.cached(&key) {
            return hit;
        }

        let tx = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                log::debug!("URL already in-flight, waiting for result: {url}");
                let rx = entry.get().subscribe();
                drop(entry); // Release DashMap lock before awaiting
                return Self::wait_for_leader(url, rx).await;
            }
            Entry::Vacant(entry) => {
                let (tx, _rx) = watch::channel(None);
                entry.insert(tx.clone());
                tx
            }
        };
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            key: key.clone(),
        };

        // A previous leader may have finished between the lookup and the claim
        let result = match self.cached(&key) {
            Some(hit) => hit,
            None => {
                let result = self.load(url).await.map(Arc::new);
                let cached = match &result {
                    Ok(resource) => CachedResponse::Success(Arc::clone(resource)),
                    Err(err) => CachedResponse::Error(err.clone()),
                };
                self.responses.insert(key, cached);
                result
            }
        };

        tx.send_replace(Some(result.clone()));
        result
    }

    async fn wait_for_leader(
        url: &str,
        mut rx: watch::Receiver<InFlightResult>,
    ) -> Result<Arc<FetchedResource>, FetchError> {
        match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or_else(|| Err(abandoned(url))),
            Err(_) => Err(abandoned(url)),
        }
    }

    async fn load(&self, url: &str) -> Result<FetchedResource, FetchError> {
        if let Some(store) = &self.store {
            match store.load(url).await {
                Ok(Some(resource)) => {
                    log::debug!("Loaded {url} from persistent cache");
                    return Ok(resource);
                }
                Ok(None) => {}
                Err(e) => log::warn!("Ignoring unreadable cache entry for {url}: {e:#}"),
            }
        }

        let resource = self.download(url).await?;

        if let Some(store) = &self.store
            && let Err(e) = store.save(&resource).await
        {
            log::warn!("Failed to persist {url} to cache: {e:#}");
        }

        Ok(resource)
    }

    async fn download(&self, url: &str) -> Result<FetchedResource, FetchError> {
        if let Some(rate) = self.settings.rate_rps {
            self.rate_limiter.acquire(url, rate).await;
        }

        self.network_requests.fetch_add(1, Ordering::Relaxed);
        log::debug!("Downloading: {url}");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.settings.user_agent)
            .timeout(self.settings.request_timeout)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("HTTP {} error: {url}", status.as_u16());
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let limit = self.settings.max_resource_bytes;
        let expected_size = response.content_length().unwrap_or(0);
        if expected_size > limit as u64 {
            return Err(FetchError::TooLarge {
                url: url.to_string(),
                limit,
            });
        }

        let final_url = Some(response.url().as_str())
            .filter(|served| cache_key(served) != cache_key(url))
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::with_capacity(usize::try_from(expected_size).unwrap_or(0));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: format!("Failed to read body: {e}"),
            })?;
            if bytes.len().saturating_add(chunk.len()) > limit {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    limit,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedResource {
            url: url.to_string(),
            final_url,
            bytes,
            content_type,
            fetched_at: Utc::now(),
        })
    }
}

fn abandoned(url: &str) -> FetchError {
    FetchError::Request {
        url: url.to_string(),
        message: "in-flight request dropped without result".to_string(),
    }
}

impl FetchCache for HttpFetchCache {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(self.fetch_coalesced(url))
    }

    fn release(&self, url: &str) {
        let key = cache_key(url);
        if self
            .responses
            .remove_if(&key, |_, cached| matches!(cached, CachedResponse::Success(_)))
            .is_some()
        {
            log::debug!("[CACHE-RELEASE] {key}");
        }
    }
}
