//! URL → archive path mapping
//!
//! Every archived resource lives at `<host>/<path segments>` under the
//! download root. Query strings are folded into the file name so URLs that
//! differ only by query never share a file, and extensionless URLs become
//! `index.<ext>` files inside a directory when the referencing context says
//! what they are.

pub mod relative;
pub mod table;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

use crate::crawl_engine::ArchiveError;
use crate::resource_kind::ResourceKind;
use crate::utils::resolve_link;

pub use relative::get_relative_url;
pub use table::ResourceTable;

/// Longest file name segment produced by query folding before the query is
/// shortened and suffixed with its hash. Keeps well under the common 255 byte
/// file name limit once an extension is appended.
const MAX_FOLDED_SEGMENT_BYTES: usize = 200;

/// Characters of a query string that cannot survive inside a file name
const QUERY_SEPARATORS: &[char] = &['&', '=', '?', '/', '\\', '#'];

/// A `/`-separated path relative to the download root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchivePath(String);

impl ArchivePath {
    fn from_segments(segments: &[String]) -> Self {
        Self(segments.join("/"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, host first and file name last
    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.split('/')
    }

    /// Join this archive path onto a download root using native separators
    #[must_use]
    pub fn to_local_path(&self, download_root: &Path) -> PathBuf {
        let mut path = download_root.to_path_buf();
        for segment in self.segments() {
            path.push(segment);
        }
        path
    }
}

impl std::fmt::Display for ArchivePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArchivePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for ArchivePath {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Map a link to its archive path.
///
/// Relative links are resolved against `page_url`. When `resource_urls` is
/// given the mapping is recorded there (and an existing mapping for the same
/// URL is returned instead of computing a new one).
///
/// # Errors
///
/// `InvalidArgument` for a relative link without a page URL, `InvalidUrl` for
/// unparseable or non-http(s) links, `PathCollision` when no free path could
/// be found for the URL in `resource_urls`.
pub fn get_archive_filename(
    link: &str,
    page_url: Option<&str>,
    resource_urls: Option<&mut ResourceTable>,
) -> Result<ArchivePath, ArchiveError> {
    map_link(link, page_url, None, resource_urls)
}

/// Like [`get_archive_filename`], with a hint of what the referencing context
/// expects the resource to be.
pub fn map_link(
    link: &str,
    page_url: Option<&str>,
    hint: Option<ResourceKind>,
    resource_urls: Option<&mut ResourceTable>,
) -> Result<ArchivePath, ArchiveError> {
    let (url, _fragment) = resolve_link(link, page_url)?;
    match resource_urls {
        Some(table) => table.map_url(link, &url, hint),
        None => archive_path_for_url(&url, hint),
    }
}

/// Compute the archive path of an absolute http(s) URL.
///
/// On its own this is not injective: `/a?b` and `/a_b` fold to the same
/// name. [`ResourceTable`] settles such clashes when URLs are recorded.
pub fn archive_path_for_url(url: &Url, hint: Option<ResourceKind>) -> Result<ArchivePath, ArchiveError> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ArchiveError::InvalidUrl {
            url: url.to_string(),
            reason: "URL has no host".to_string(),
        })?;

    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let raw_path = url.path();
    let mut segments: Vec<String> = std::iter::once(authority)
        .chain(
            raw_path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
        .collect();

    let folded_query = url
        .query()
        .filter(|q| !q.is_empty())
        .map(fold_query);
    let hinted_ext = hint.and_then(ResourceKind::default_extension);

    let is_directory = raw_path.ends_with('/') || segments.len() == 1;
    if is_directory {
        let ext = hinted_ext.unwrap_or("html");
        segments.push(file_name("index", folded_query.as_deref(), Some(ext)));
        return Ok(ArchivePath::from_segments(&segments));
    }

    // `segments` has the host plus at least one path segment here
    let last = segments.pop().unwrap_or_default();
    match split_extension(&last) {
        (stem, Some(ext)) => {
            segments.push(file_name(stem, folded_query.as_deref(), Some(ext)));
        }
        (name, None) => match hinted_ext {
            Some(ext) => {
                segments.push(file_name(name, folded_query.as_deref(), None));
                segments.push(format!("index.{ext}"));
            }
            None => segments.push(file_name(name, folded_query.as_deref(), None)),
        },
    }

    Ok(ArchivePath::from_segments(&segments))
}

/// Fold a query string into something usable inside a file name.
///
/// `v=1.2.3&i=u` → `v_1.2.3_i_u`
#[must_use]
pub fn fold_query(query: &str) -> String {
    query.replace(QUERY_SEPARATORS, "_")
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// Whether two URLs name the same document.
///
/// Scheme, empty path segments and a trailing `index.*` file name are
/// ignored, so `https://host/docs`, `http://host/docs/` and
/// `https://host//docs/index.html` are all one document. Host, port and
/// query must match.
#[must_use]
pub fn same_document(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str()
        && a.port() == b.port()
        && a.query().filter(|q| !q.is_empty()) == b.query().filter(|q| !q.is_empty())
        && document_segments(a) == document_segments(b)
}

fn document_segments(url: &Url) -> Vec<&str> {
    let path = url.path();
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if !path.ends_with('/') && segments.last().is_some_and(|last| last.starts_with("index.")) {
        segments.pop();
    }
    segments
}

/// `path` with the xxh3 digest of `url` appended to its file stem
fn disambiguated(path: &ArchivePath, url: &Url) -> ArchivePath {
    let mut segments: Vec<String> = path.segments().map(str::to_string).collect();
    if let Some(last) = segments.pop() {
        let digest = format!("{:016x}", xxh3_64(url.as_str().as_bytes()));
        let (stem, ext) = split_extension(&last);
        segments.push(file_name(&format!("{stem}_{digest}"), None, ext));
    }
    ArchivePath::from_segments(&segments)
}

fn file_name(stem: &str, folded_query: Option<&str>, ext: Option<&str>) -> String {
    let mut name = stem.to_string();

    if let Some(query) = folded_query {
        name.push('_');
        if stem.len() + query.len() + 1 > MAX_FOLDED_SEGMENT_BYTES {
            let budget = MAX_FOLDED_SEGMENT_BYTES.saturating_sub(stem.len() + 18);
            let mut cut = budget.min(query.len());
            while !query.is_char_boundary(cut) {
                cut -= 1;
            }
            name.push_str(&query[..cut]);
            name.push_str(&format!("_{:016x}", xxh3_64(query.as_bytes())));
        } else {
            name.push_str(query);
        }
    }

    if let Some(ext) = ext {
        name.push('.');
        name.push_str(ext);
    }
    name
}

/// Download root plus the mapping operations that depend on it
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    download_root: PathBuf,
}

impl ArchiveLayout {
    #[must_use]
    pub fn new(download_root: impl Into<PathBuf>) -> Self {
        Self {
            download_root: download_root.into(),
        }
    }

    #[must_use]
    pub fn download_root(&self) -> &Path {
        &self.download_root
    }

    /// Archive path of `link`, see [`get_archive_filename`]
    pub fn archive_filename(
        &self,
        link: &str,
        page_url: Option<&str>,
        resource_urls: Option<&mut ResourceTable>,
    ) -> Result<ArchivePath, ArchiveError> {
        get_archive_filename(link, page_url, resource_urls)
    }

    /// Where an archive path lives on disk
    #[must_use]
    pub fn local_path(&self, path: &ArchivePath) -> PathBuf {
        path.to_local_path(&self.download_root)
    }
}
