use std::collections::HashMap;

use crate::resource_kind::ResourceKind;

/// A reference found in a document, exactly as written there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReference {
    /// Attribute value or CSS `url()`/`@import` target, trimmed
    pub raw: String,
    /// What the referencing context expects the target to be
    pub hint: Option<ResourceKind>,
    /// `<a>`/`<area>` link rather than an embedded resource
    pub navigational: bool,
}

impl RawReference {
    pub(crate) fn embedded(raw: &str, hint: Option<ResourceKind>) -> Self {
        Self {
            raw: raw.trim().to_string(),
            hint,
            navigational: false,
        }
    }

    pub(crate) fn anchor(raw: &str) -> Self {
        Self {
            raw: raw.trim().to_string(),
            hint: Some(ResourceKind::Html),
            navigational: true,
        }
    }
}

/// References of one HTML document plus its `<base href>`, if any
#[derive(Debug, Clone, Default)]
pub struct HtmlScan {
    pub base_href: Option<String>,
    pub references: Vec<RawReference>,
}

/// Raw reference → replacement text
pub type Replacements = HashMap<String, String>;

/// Find the replacement for a reference as written in a document.
///
/// Falls back to the entity-decoded spelling so `a.png?x=1&amp;y=2` matches
/// a key recorded as `a.png?x=1&y=2`.
pub(crate) fn lookup<'a>(replacements: &'a Replacements, raw: &str) -> Option<&'a String> {
    let trimmed = raw.trim();
    replacements.get(trimmed).or_else(|| {
        let decoded = html_escape::decode_html_entities(trimmed);
        if decoded == trimmed {
            None
        } else {
            replacements.get(decoded.as_ref())
        }
    })
}

/// Error type for document rewriting failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum RewriteError {
    #[error("HTML rewriter error: {0}")]
    Html(String),
}
