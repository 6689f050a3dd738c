//! Resource classification
//!
//! Decides whether a fetched payload is parsed for further references (HTML,
//! CSS) or persisted untouched (opaque). The server's content type wins; the
//! URL extension is only consulted when the content type is missing or too
//! generic to mean anything.

use serde::{Deserialize, Serialize};
use url::Url;

/// The closed set of payload kinds the archiver distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Html,
    Css,
    Opaque,
}

impl ResourceKind {
    /// File extension used when an extensionless URL has to become a file
    #[must_use]
    pub const fn default_extension(self) -> Option<&'static str> {
        match self {
            Self::Html => Some("html"),
            Self::Css => Some("css"),
            Self::Opaque => None,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Html => write!(f, "HTML"),
            ResourceKind::Css => write!(f, "CSS"),
            ResourceKind::Opaque => write!(f, "opaque"),
        }
    }
}

/// Content types that carry no information about the payload
const GENERIC_CONTENT_TYPES: &[&str] = &[
    "application/octet-stream",
    "binary/octet-stream",
    "application/unknown",
    "text/plain",
];

/// Classify a resource from its URL and the server-reported content type.
#[must_use]
pub fn classify(url: &Url, content_type: Option<&str>) -> ResourceKind {
    if let Some(kind) = content_type.and_then(kind_from_content_type) {
        return kind;
    }

    kind_from_extension(url.path()).unwrap_or(ResourceKind::Opaque)
}

/// Map a `Content-Type` header value to a kind.
///
/// Returns `None` for empty or generic types so the caller falls back to the
/// extension.
#[must_use]
pub fn kind_from_content_type(content_type: &str) -> Option<ResourceKind> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence.is_empty() || GENERIC_CONTENT_TYPES.contains(&essence.as_str()) {
        return None;
    }

    Some(match essence.as_str() {
        "text/html" | "application/xhtml+xml" => ResourceKind::Html,
        "text/css" => ResourceKind::Css,
        _ => ResourceKind::Opaque,
    })
}

/// Infer a kind from the extension of the last path segment.
#[must_use]
pub fn kind_from_extension(path: &str) -> Option<ResourceKind> {
    let name = path.rsplit('/').next().unwrap_or_default();
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }

    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" | "xhtml" | "shtml" => Some(ResourceKind::Html),
        "css" => Some(ResourceKind::Css),
        _ => None,
    }
}
