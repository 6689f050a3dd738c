//! On-disk store of fetched payloads shared across archive runs
//!
//! Each entry is a pair of files named by the xxh3 hash of the URL: the raw
//! body and a small JSON metadata file. Entries older than the configured
//! max age are treated as missing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use super::FetchedResource;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMetadata {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    final_url: Option<String>,
    content_type: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    fetched_at: DateTime<Utc>,
}

/// Directory-backed payload store
#[derive(Debug, Clone)]
pub struct PersistentStore {
    dir: PathBuf,
    max_age: Option<Duration>,
}

impl PersistentStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, max_age: Option<Duration>) -> Self {
        Self {
            dir: dir.into(),
            max_age,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let key = format!("{:016x}", xxh3_64(url.as_bytes()));
        (
            self.dir.join(format!("{key}.body")),
            self.dir.join(format!("{key}.json")),
        )
    }

    /// Load a stored payload.
    ///
    /// Returns `Ok(None)` when nothing is stored, the entry expired, or the
    /// entry belongs to a different URL with the same hash.
    pub async fn load(&self, url: &str) -> Result<Option<FetchedResource>> {
        let (body_path, meta_path) = self.entry_paths(url);

        if !tokio::fs::try_exists(&meta_path).await? {
            return Ok(None);
        }

        let raw_meta = tokio::fs::read(&meta_path)
            .await
            .with_context(|| format!("Failed to read cache metadata {}", meta_path.display()))?;
        let meta: StoredMetadata =
            serde_json::from_slice(&raw_meta).context("Failed to parse cache metadata JSON")?;

        if meta.url != url {
            log::debug!("Cache entry hash collision for {url} (stored: {})", meta.url);
            return Ok(None);
        }

        if let Some(max_age) = self.max_age {
            let age = Utc::now().signed_duration_since(meta.fetched_at);
            if age.to_std().is_ok_and(|age| age > max_age) {
                log::debug!("Cache entry for {url} expired ({age})");
                return Ok(None);
            }
        }

        let bytes = tokio::fs::read(&body_path)
            .await
            .with_context(|| format!("Failed to read cached body {}", body_path.display()))?;

        Ok(Some(FetchedResource {
            url: meta.url,
            final_url: meta.final_url,
            bytes,
            content_type: meta.content_type,
            fetched_at: meta.fetched_at,
        }))
    }

    /// Store a payload, replacing any previous entry for the URL.
    pub async fn save(&self, resource: &FetchedResource) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache dir {}", self.dir.display()))?;

        let (body_path, meta_path) = self.entry_paths(&resource.url);
        let meta = StoredMetadata {
            url: resource.url.clone(),
            final_url: resource.final_url.clone(),
            content_type: resource.content_type.clone(),
            fetched_at: resource.fetched_at,
        };

        // Body first: metadata marks the entry as present
        tokio::fs::write(&body_path, &resource.bytes)
            .await
            .with_context(|| format!("Failed to write cached body {}", body_path.display()))?;
        tokio::fs::write(&meta_path, serde_json::to_vec(&meta)?)
            .await
            .with_context(|| format!("Failed to write cache metadata {}", meta_path.display()))?;

        Ok(())
    }
}
