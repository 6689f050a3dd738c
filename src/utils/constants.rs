//! Shared configuration constants for the archiver
//!
//! Default values used by the config builder and the fetch cache so the
//! numbers live in one place.

/// Default per-domain request rate: 8 requests per second
///
/// An archive run fetches many small assets (icons, fonts, stylesheets) from
/// the same origin, so this is higher than a page crawler would use while
/// still keeping the load on a single origin modest.
pub const DEFAULT_FETCH_RATE_RPS: f64 = 8.0;

/// Default number of resources fetched concurrently across all domains
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

/// Default number of resources fetched concurrently from one domain
pub const DEFAULT_MAX_CONCURRENT_PER_DOMAIN: usize = 4;

/// Default HTTP request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default ceiling for a single downloaded resource: 50 MiB
///
/// Large enough for web fonts, videos posters and bundled scripts; anything
/// bigger is almost certainly not needed to render a page offline.
pub const DEFAULT_MAX_RESOURCE_BYTES: usize = 50 * 1024 * 1024;

/// File name of the manifest written at the download root
pub const MANIFEST_FILENAME: &str = "archive_manifest.json";

/// Browser-like user agent sent with every request
///
/// Some CDNs serve different (or no) font files to unknown clients, so the
/// archiver identifies like a current desktop Chrome.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";
