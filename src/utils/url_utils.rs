//! URL helpers shared by the mapper, the rewriters and the crawl engine.

use url::Url;

use crate::crawl_engine::ArchiveError;

/// Schemes whose references are never fetched or rewritten
const NON_ARCHIVABLE_PREFIXES: &[&str] = &[
    "data:",
    "javascript:",
    "mailto:",
    "tel:",
    "about:",
    "blob:",
];

/// Check whether a reference found in a document points at something
/// the archiver can fetch.
///
/// Empty references, fragment-only references and non-network schemes are
/// left exactly as written.
#[must_use]
pub fn is_archivable_reference(reference: &str) -> bool {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return false;
    }

    let lowered = reference.to_ascii_lowercase();
    !NON_ARCHIVABLE_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}


/// Resolve a link against the page that referenced it.
///
/// Absolute links are parsed as-is; relative and protocol-relative links need
/// `page_url`. The fragment is returned separately because it is not part of
/// the resource's identity.
pub fn resolve_link(link: &str, page_url: Option<&str>) -> Result<(Url, Option<String>), ArchiveError> {
    let link = link.trim();

    let mut resolved = match Url::parse(link) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let page_url = page_url.ok_or_else(|| ArchiveError::InvalidArgument {
                link: link.to_string(),
            })?;
            let base = Url::parse(page_url).map_err(|e| ArchiveError::InvalidUrl {
                url: page_url.to_string(),
                reason: e.to_string(),
            })?;
            base.join(link).map_err(|e| ArchiveError::InvalidUrl {
                url: link.to_string(),
                reason: e.to_string(),
            })?
        }
        Err(e) => {
            return Err(ArchiveError::InvalidUrl {
                url: link.to_string(),
                reason: e.to_string(),
            });
        }
    };

    if !matches!(resolved.scheme(), "http" | "https") {
        return Err(ArchiveError::InvalidUrl {
            url: link.to_string(),
            reason: format!("unsupported scheme `{}`", resolved.scheme()),
        });
    }
    if resolved.host_str().is_none_or(str::is_empty) {
        return Err(ArchiveError::InvalidUrl {
            url: link.to_string(),
            reason: "URL has no host".to_string(),
        });
    }

    let fragment = resolved.fragment().map(str::to_string);
    resolved.set_fragment(None);

    Ok((resolved, fragment))
}
