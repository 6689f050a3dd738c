//! Crawl Engine Module
//!
//! This module contains the archive crawl loop and the pieces it is built
//! from: per-run state, concurrency and rate limits, cancellation and
//! progress reporting.

// Sub-modules
pub mod cancel;
pub(crate) mod context;
pub mod core;
pub mod crawl_types;
pub mod domain_limiter;
pub mod progress;
pub mod rate_limiter;

// Re-exports for public API
pub use self::core::{ArchiveDownloader, archive};

// Re-export progress and cancellation types for advanced usage
pub use cancel::CancelHandle;
pub use progress::{LogProgress, NoOpProgress, ProgressReporter};

// Re-export rate limiter types
pub use rate_limiter::{CrawlRateLimiter, RateLimitDecision, extract_domain};

// Re-export domain limiter
pub use domain_limiter::DomainLimiter;

// Re-export crawl types
pub use crawl_types::{
    ArchiveError, ArchiveResult, FailedResource, FrontierEntry, PersistedResource,
};
