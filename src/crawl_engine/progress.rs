//! Progress reporting abstraction for archive runs
//!
//! Defines the `ProgressReporter` trait for lifecycle event reporting
//! and provides a no-op implementation for simple use cases.

use crate::archive_path::ArchivePath;
use crate::resource_kind::ResourceKind;

/// Trait for reporting archive progress at key lifecycle events
///
/// Implementations can send updates to channels, log to console, update UI, etc.
pub trait ProgressReporter: Send + Sync {
    /// Report that a run has started for `root_url`
    fn report_started(&self, root_url: &str);

    /// Report that a resource was written to the archive
    fn report_resource_archived(&self, url: &str, path: &ArchivePath, kind: ResourceKind);

    /// Report that a resource could not be archived
    fn report_resource_failed(&self, url: &str, reason: &str);

    /// Report that the run finished
    fn report_completed(&self, archived: usize, failed: usize);
}

/// Progress reporter that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgress;

impl ProgressReporter for NoOpProgress {
    #[inline(always)]
    fn report_started(&self, _root_url: &str) {}

    #[inline(always)]
    fn report_resource_archived(&self, _url: &str, _path: &ArchivePath, _kind: ResourceKind) {}

    #[inline(always)]
    fn report_resource_failed(&self, _url: &str, _reason: &str) {}

    #[inline(always)]
    fn report_completed(&self, _archived: usize, _failed: usize) {}
}

/// Progress reporter that writes each event to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report_started(&self, root_url: &str) {
        log::info!("Archiving {root_url}");
    }

    fn report_resource_archived(&self, url: &str, path: &ArchivePath, kind: ResourceKind) {
        log::info!("Archived {kind} {url} -> {path}");
    }

    fn report_resource_failed(&self, url: &str, reason: &str) {
        log::warn!("Failed to archive {url}: {reason}");
    }

    fn report_completed(&self, archived: usize, failed: usize) {
        log::info!("Archive complete: {archived} resources written, {failed} failed");
    }
}
