//! Per-domain request rate limiting for archive fetches
//!
//! Token bucket per domain, held in a bounded LRU table so a run that touches
//! thousands of CDNs does not grow without limit. Each archive run owns its
//! own limiter, so concurrent runs and parallel tests do not share buckets.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;

/// Maximum number of domains tracked at once
const MAX_TRACKED_DOMAINS: usize = 1000;

/// Shortest wait handed out on denial
const MIN_RETRY_AFTER: Duration = Duration::from_millis(1);

/// Rate limit decision for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request is allowed to proceed
    Allow,
    /// Request must wait before retrying
    Deny { retry_after: Duration },
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate_rps: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_rps: f64) -> Self {
        let capacity = rate_rps.max(1.0);
        Self {
            tokens: capacity,
            capacity,
            rate_rps,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, now: Instant) -> RateLimitDecision {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_rps).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return RateLimitDecision::Allow;
        }

        let missing = 1.0 - self.tokens;
        let retry_after = Duration::from_secs_f64(missing / self.rate_rps).max(MIN_RETRY_AFTER);
        RateLimitDecision::Deny { retry_after }
    }
}

/// Token-bucket limiter keyed by domain
#[derive(Debug)]
pub struct CrawlRateLimiter {
    buckets: Mutex<LruCache<String, TokenBucket>>,
}

impl Default for CrawlRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_TRACKED_DOMAINS)
    }

    #[must_use]
    pub fn with_capacity(max_domains: usize) -> Self {
        let capacity = NonZeroUsize::new(max_domains).unwrap_or(NonZeroUsize::MIN);
        Self {
            buckets: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Try to take a token for the domain of `url` without waiting.
    ///
    /// A non-positive rate disables limiting.
    pub async fn check(&self, url: &str, rate_rps: f64) -> RateLimitDecision {
        if rate_rps <= 0.0 || !rate_rps.is_finite() {
            return RateLimitDecision::Allow;
        }

        let domain = match extract_domain(url) {
            Some(domain) if !domain.is_empty() => domain,
            _ => return RateLimitDecision::Allow,
        };

        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        if let Some(bucket) = buckets.get_mut(&domain) {
            if (bucket.rate_rps - rate_rps).abs() > f64::EPSILON {
                *bucket = TokenBucket::new(rate_rps);
            }
            return bucket.try_consume(now);
        }

        let mut bucket = TokenBucket::new(rate_rps);
        let decision = bucket.try_consume(now);
        buckets.put(domain, bucket);
        decision
    }

    /// Wait until a token for the domain of `url` is available.
    pub async fn acquire(&self, url: &str, rate_rps: f64) {
        loop {
            match self.check(url, rate_rps).await {
                RateLimitDecision::Allow => return,
                RateLimitDecision::Deny { retry_after } => {
                    log::trace!("Rate limited {url}, retrying in {retry_after:?}");
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }

    /// Number of domains currently tracked
    pub async fn tracked_domain_count(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

/// Extract the rate-limiting domain from a URL.
///
/// Lowercased, port dropped, leading `www.` removed.
#[must_use]
pub fn extract_domain(url: &str) -> Option<String> {
    let after_scheme = match url.find("://") {
        Some(scheme_end) => &url[scheme_end + 3..],
        None => url,
    };
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(after_scheme);
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let host = if host_port.starts_with('[') {
        host_port
            .split_inclusive(']')
            .next()
            .unwrap_or(host_port)
    } else {
        host_port.split(':').next().unwrap_or(host_port)
    };

    let host = match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest,
        _ => host,
    };
    Some(host.to_lowercase())
}
