pub mod archive_path;
pub mod config;
pub mod content_saver;
pub mod crawl_engine;
pub mod fetch_cache;
pub mod link_rewriter;
pub mod resource_kind;
pub mod utils;

pub use archive_path::{
    ArchiveLayout, ArchivePath, ResourceTable, archive_path_for_url, get_archive_filename,
    get_relative_url, map_link,
};
pub use config::{AnchorPolicy, ArchiveConfig};
pub use content_saver::{ArchiveManifest, read_manifest};
pub use crawl_engine::{
    ArchiveDownloader, ArchiveError, ArchiveResult, CancelHandle, FailedResource, LogProgress,
    NoOpProgress, PersistedResource, ProgressReporter, archive,
};
pub use fetch_cache::{
    FetchCache, FetchError, FetchSettings, FetchedResource, HttpFetchCache, PersistentStore,
};
pub use resource_kind::{ResourceKind, classify};

// Test-accessible modules
pub use crawl_engine::rate_limiter as crawl_rate_limiter;
