//! Per-domain concurrency limiter
//!
//! Caps how many fetches run against one host at a time, independently of
//! the global fetch limit.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::rate_limiter::extract_domain;

/// One semaphore per domain, created on first use
pub struct DomainLimiter {
    domain_semaphores: DashMap<String, Arc<Semaphore>>,
    max_per_domain: usize,
}

impl DomainLimiter {
    #[must_use]
    pub fn new(max_per_domain: usize) -> Self {
        Self {
            domain_semaphores: DashMap::new(),
            max_per_domain: max_per_domain.max(1),
        }
    }

    /// Acquire a permit for the domain of `url`.
    ///
    /// The permit is released when dropped.
    pub async fn acquire_for_url(&self, url: &str) -> OwnedSemaphorePermit {
        let domain = extract_domain(url).unwrap_or_default();
        self.acquire(domain).await
    }

    /// Acquire a permit for `domain`.
    pub async fn acquire(&self, domain: String) -> OwnedSemaphorePermit {
        loop {
            let semaphore = self
                .domain_semaphores
                .entry(domain.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_domain)))
                .clone();

            match semaphore.acquire_owned().await {
                Ok(permit) => return permit,
                Err(_) => {
                    // Semaphores are never closed here; replace and retry if one is
                    log::error!("Semaphore for domain '{domain}' was closed unexpectedly - replacing");
                    self.domain_semaphores
                        .insert(domain.clone(), Arc::new(Semaphore::new(self.max_per_domain)));
                }
            }
        }
    }

    /// Number of domains seen so far
    #[must_use]
    pub fn domain_count(&self) -> usize {
        self.domain_semaphores.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_limits_concurrency_per_domain() {
        let limiter = DomainLimiter::new(1);
        let held = limiter.acquire_for_url("https://example.com/a").await;

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            limiter.acquire_for_url("https://www.example.com/b"),
        )
        .await;
        assert!(blocked.is_err());

        let other = tokio::time::timeout(
            Duration::from_millis(50),
            limiter.acquire_for_url("https://other.org/c"),
        )
        .await;
        assert!(other.is_ok());

        drop(held);
        let after_release = tokio::time::timeout(
            Duration::from_millis(50),
            limiter.acquire_for_url("https://example.com/b"),
        )
        .await;
        assert!(after_release.is_ok());
        assert_eq!(limiter.domain_count(), 2);
    }
}
