//! Resource table: the URL → archive path mapping of one run
//!
//! The table is the single source of truth for where a URL lives inside the
//! archive. It also remembers every raw link spelling that resolved to a URL,
//! so callers can look a reference up exactly as it was written in a page.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use url::Url;

use super::{ArchivePath, archive_path_for_url, disambiguated, same_document};
use crate::crawl_engine::ArchiveError;
use crate::resource_kind::ResourceKind;

/// Mapping from absolute URL to archive path.
///
/// Serializes as a plain `{ url: path }` object. Link aliases are a lookup
/// aid and are not persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, ArchivePath>",
    into = "BTreeMap<String, ArchivePath>"
)]
pub struct ResourceTable {
    urls: BTreeMap<String, ArchivePath>,
    aliases: HashMap<String, String>,
    owners: HashMap<ArchivePath, String>,
}

impl ResourceTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `url` (written as `link` in its referrer) and record the result.
    ///
    /// An already-mapped URL keeps its first path regardless of `hint`. A URL
    /// naming the same document as the owner of its computed path (see
    /// [`same_document`]) shares that path. Any other URL whose computed path
    /// is taken gets the path with its URL digest appended to the file stem.
    ///
    /// # Errors
    ///
    /// `PathCollision` when the digest-suffixed path is taken as well. The
    /// table is left unchanged in that case.
    pub fn map_url(
        &mut self,
        link: &str,
        url: &Url,
        hint: Option<ResourceKind>,
    ) -> Result<ArchivePath, ArchiveError> {
        if let Some(existing) = self.urls.get(url.as_str()) {
            let existing = existing.clone();
            self.add_alias(link, url.as_str());
            return Ok(existing);
        }

        let mut path = archive_path_for_url(url, hint)?;
        if let Some(owner) = self.owners.get(&path)
            && !is_same_document(owner, url)
        {
            let renamed = disambiguated(&path, url);
            log::debug!("Archive path {path} is taken by {owner}, mapping {url} to {renamed}");
            path = renamed;
        }

        self.insert(url.as_str(), path.clone())?;
        self.add_alias(link, url.as_str());
        Ok(path)
    }

    /// Record an explicit URL → path pair.
    ///
    /// Re-inserting the same pair is a no-op. A URL naming the same document
    /// as the path's owner is recorded as a second name for that path.
    ///
    /// # Errors
    ///
    /// `PathCollision` when `path` is owned by a different document, or when
    /// `url` is already mapped to a different path.
    pub fn insert(&mut self, url: &str, path: ArchivePath) -> Result<(), ArchiveError> {
        if let Some(owner) = self.owners.get(&path)
            && owner != url
            && !Url::parse(url).is_ok_and(|url| is_same_document(owner, &url))
        {
            return Err(ArchiveError::PathCollision {
                path: path.to_string(),
                existing: owner.clone(),
                incoming: url.to_string(),
            });
        }
        if let Some(current) = self.urls.get(url)
            && current != &path
        {
            return Err(ArchiveError::PathCollision {
                path: current.to_string(),
                existing: url.to_string(),
                incoming: url.to_string(),
            });
        }

        self.owners
            .entry(path.clone())
            .or_insert_with(|| url.to_string());
        self.urls.insert(url.to_string(), path);
        Ok(())
    }

    fn add_alias(&mut self, link: &str, url: &str) {
        let link = link.trim();
        if link != url {
            self.aliases
                .entry(link.to_string())
                .or_insert_with(|| url.to_string());
        }
    }

    /// Look up by absolute URL, falling back to a recorded raw link.
    #[must_use]
    pub fn get(&self, link_or_url: &str) -> Option<&ArchivePath> {
        let key = link_or_url.trim();
        self.urls.get(key).or_else(|| {
            self.aliases
                .get(key)
                .and_then(|url| self.urls.get(url.as_str()))
        })
    }

    #[must_use]
    pub fn path_for_url(&self, url: &Url) -> Option<&ArchivePath> {
        self.urls.get(url.as_str())
    }

    #[must_use]
    pub fn contains_url(&self, url: &str) -> bool {
        self.urls.contains_key(url)
    }

    /// URL that owns `path`, if any. Other URLs mapped to the same path
    /// name the same document and are never fetched separately.
    #[must_use]
    pub fn owner_of(&self, path: &ArchivePath) -> Option<&str> {
        self.owners.get(path).map(String::as_str)
    }

    /// Number of distinct URLs mapped
    #[must_use]
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// `(url, path)` pairs in URL order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArchivePath)> {
        self.urls.iter().map(|(url, path)| (url.as_str(), path))
    }

    /// Merge another table in, keeping existing mappings on conflict.
    ///
    /// Returns the URLs that could not be merged because their path was
    /// already owned by a different URL.
    pub fn merge(&mut self, other: &ResourceTable) -> Vec<String> {
        let mut rejected = Vec::new();
        for (url, path) in other.iter() {
            if self.contains_url(url) {
                continue;
            }
            if self.insert(url, path.clone()).is_err() {
                rejected.push(url.to_string());
            }
        }
        for (link, url) in &other.aliases {
            if self.contains_url(url) {
                self.aliases
                    .entry(link.clone())
                    .or_insert_with(|| url.clone());
            }
        }
        rejected
    }
}

fn is_same_document(owner: &str, url: &Url) -> bool {
    Url::parse(owner).is_ok_and(|owner| same_document(&owner, url))
}

impl From<BTreeMap<String, ArchivePath>> for ResourceTable {
    fn from(urls: BTreeMap<String, ArchivePath>) -> Self {
        let mut table = Self::default();
        for (url, path) in urls {
            if let Err(e) = table.insert(&url, path) {
                log::warn!("Dropping table entry for {url}: {e}");
            }
        }
        table
    }
}

impl From<ResourceTable> for BTreeMap<String, ArchivePath> {
    fn from(table: ResourceTable) -> Self {
        table.urls
    }
}
