//! Fetch cache
//!
//! Every network read of an archive run goes through a [`FetchCache`]. The
//! cache guarantees that one URL is requested at most once per cache
//! instance until it is released: concurrent callers for the same URL share a
//! single in-flight request, and later callers get the stored outcome.

pub mod http;
pub mod persistent;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use http::{FetchSettings, HttpFetchCache};
pub use persistent::PersistentStore;

/// Error type for fetch failures
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum FetchError {
    #[error("request for {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("HTTP error {status}: {url}")]
    Status { url: String, status: u16 },

    #[error("{url} exceeds the {limit} byte resource limit")]
    TooLarge { url: String, limit: usize },
}

impl FetchError {
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Request { url, .. } | Self::Status { url, .. } | Self::TooLarge { url, .. } => url,
        }
    }
}

/// A fetched payload with the metadata the archiver needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedResource {
    /// URL as requested
    pub url: String,
    /// URL the payload was served from, when redirects led elsewhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub bytes: Vec<u8>,
    /// Raw `Content-Type` header value, if the server sent one
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Type alias for a boxed fetch future
pub type FetchFuture<'a> = std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<Arc<FetchedResource>, FetchError>> + Send + 'a>,
>;

/// Source of resource payloads for an archive run
pub trait FetchCache: Send + Sync {
    /// Fetch `url`, sharing the result with every other caller for the same URL.
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a>;

    /// Drop the stored payload of `url` once the caller has persisted it.
    ///
    /// Failures stay cached. A released URL is loaded again if requested later.
    fn release(&self, _url: &str) {}
}

/// Normalize a URL into the key used for caching and coalescing.
///
/// Parsing and re-serializing drops default ports and settles on one
/// percent-encoding, so equivalent spellings share a key.
pub(crate) fn cache_key(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}
