//! Writing archived resources and the run manifest to disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive_path::{ArchivePath, ResourceTable};
use crate::crawl_engine::FailedResource;
use crate::utils::MANIFEST_FILENAME;

/// Contents of `archive_manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub root_url: String,
    pub root_path: ArchivePath,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    /// Absolute URL → archive path for every resource of the run
    pub resources: ResourceTable,
    #[serde(default)]
    pub failures: Vec<FailedResource>,
}

/// Write `bytes` at `path` under `download_root`, creating directories.
///
/// Returns the file that was written.
pub async fn save_resource(download_root: &Path, path: &ArchivePath, bytes: &[u8]) -> Result<PathBuf> {
    if path
        .segments()
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        bail!("Refusing to write outside the archive: {path}");
    }

    let target = path.to_local_path(download_root);
    let parent = target
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Path has no parent directory: {}", target.display()))?;

    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    tokio::fs::write(&target, bytes)
        .await
        .with_context(|| format!("Failed to write {}", target.display()))?;

    log::debug!("Saved {} bytes to {}", bytes.len(), target.display());
    Ok(target)
}

/// Write the run manifest at the download root.
pub async fn write_manifest(download_root: &Path, manifest: &ArchiveManifest) -> Result<PathBuf> {
    let target = download_root.join(MANIFEST_FILENAME);
    let json = serde_json::to_vec_pretty(manifest).context("Failed to serialize manifest")?;

    tokio::fs::create_dir_all(download_root)
        .await
        .with_context(|| format!("Failed to create directory {}", download_root.display()))?;
    tokio::fs::write(&target, json)
        .await
        .with_context(|| format!("Failed to write manifest {}", target.display()))?;

    Ok(target)
}

/// Read a manifest written by an earlier run.
pub async fn read_manifest(download_root: &Path) -> Result<ArchiveManifest> {
    let source = download_root.join(MANIFEST_FILENAME);
    let raw = tokio::fs::read(&source)
        .await
        .with_context(|| format!("Failed to read manifest {}", source.display()))?;
    serde_json::from_slice(&raw).context("Failed to parse manifest JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive_path::get_archive_filename;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_creates_directories() {
        let dir = TempDir::new().unwrap();
        let path = get_archive_filename("https://example.com/a/b/c.css", None, None).unwrap();

        let written = save_resource(dir.path(), &path, b"x{}").await.unwrap();

        assert_eq!(written, dir.path().join("example.com/a/b/c.css"));
        assert_eq!(tokio::fs::read(&written).await.unwrap(), b"x{}");
    }

    #[tokio::test]
    async fn test_manifest_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut resources = ResourceTable::new();
        let root_path =
            get_archive_filename("https://example.com/", None, Some(&mut resources)).unwrap();

        let manifest = ArchiveManifest {
            root_url: "https://example.com/".into(),
            root_path: root_path.clone(),
            created_at: Utc::now(),
            resources,
            failures: vec![FailedResource {
                url: "https://example.com/gone.png".into(),
                referrer: Some("https://example.com/".into()),
                reason: "HTTP error 404: https://example.com/gone.png".into(),
            }],
        };
        write_manifest(dir.path(), &manifest).await.unwrap();

        let loaded = read_manifest(dir.path()).await.unwrap();
        assert_eq!(loaded.root_path, root_path);
        assert_eq!(loaded.resources.get("https://example.com/"), Some(&root_path));
        assert_eq!(loaded.failures.len(), 1);
    }
}
