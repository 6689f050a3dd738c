//! Stylesheet reference scanning and rewriting
//!
//! Finds `url(...)` and `@import "..."` references outside comments and
//! splices replacements back in place. Everything else in the stylesheet is
//! left byte-for-byte as it was.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::types::{RawReference, Replacements, lookup};
use crate::resource_kind::ResourceKind;
use crate::utils::is_archivable_reference;

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)/\*.*?\*/").expect("Invalid CSS comment regex")
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)\s"']*))\s*\)"#).expect("Invalid CSS url() regex")
});

static IMPORT_STRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(?:"([^"]*)"|'([^']*)')"#).expect("Invalid CSS @import regex")
});

static IMPORT_TAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)@import\s*$").expect("Invalid CSS @import tail regex")
});

/// One reference inside a stylesheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssReference {
    /// Byte range of the value, quotes excluded
    pub span: Range<usize>,
    pub raw: String,
    pub quoted: bool,
    /// Target of an `@import`, so another stylesheet
    pub import: bool,
}

impl CssReference {
    fn hint(&self) -> Option<ResourceKind> {
        self.import.then_some(ResourceKind::Css)
    }
}

fn comment_spans(css: &str) -> Vec<Range<usize>> {
    COMMENT_RE.find_iter(css).map(|m| m.range()).collect()
}

fn in_comment(spans: &[Range<usize>], pos: usize) -> bool {
    spans.iter().any(|span| span.contains(&pos))
}

/// Scan a stylesheet for references.
///
/// Non-archivable values (`data:` URIs, fragments, empty strings) are
/// skipped. Results are in document order.
#[must_use]
pub fn scan_css(css: &str) -> Vec<CssReference> {
    let comments = comment_spans(css);
    let mut found = Vec::new();

    for caps in URL_RE.captures_iter(css) {
        let Some(whole) = caps.get(0) else { continue };
        if in_comment(&comments, whole.start()) {
            continue;
        }
        let (value, quoted) = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(v), _, _) | (_, Some(v), _) => (v, true),
            (_, _, Some(v)) => (v, false),
            _ => continue,
        };
        if !is_archivable_reference(value.as_str()) {
            continue;
        }
        let import = IMPORT_TAIL_RE.is_match(&css[..whole.start()]);
        found.push(CssReference {
            span: value.range(),
            raw: value.as_str().trim().to_string(),
            quoted,
            import,
        });
    }

    for caps in IMPORT_STRING_RE.captures_iter(css) {
        let Some(whole) = caps.get(0) else { continue };
        if in_comment(&comments, whole.start()) {
            continue;
        }
        let Some(value) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        if !is_archivable_reference(value.as_str()) {
            continue;
        }
        found.push(CssReference {
            span: value.range(),
            raw: value.as_str().trim().to_string(),
            quoted: true,
            import: true,
        });
    }

    found.sort_by_key(|r| r.span.start);
    found
}

/// References of a stylesheet in the shape shared with HTML scanning
#[must_use]
pub fn extract_css_references(css: &str) -> Vec<RawReference> {
    scan_css(css)
        .into_iter()
        .map(|r| RawReference::embedded(&r.raw, r.hint()))
        .collect()
}

fn needs_quoting(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | '\'' | '\\'))
}

/// Rewrite every reference that has a replacement.
///
/// Unquoted values whose replacement would break the `url()` token are
/// wrapped in single quotes.
#[must_use]
pub fn rewrite_css(css: &str, replacements: &Replacements) -> String {
    let edits: Vec<(Range<usize>, String)> = scan_css(css)
        .into_iter()
        .filter_map(|r| {
            let replacement = lookup(replacements, &r.raw)?;
            let text = if !r.quoted && needs_quoting(replacement) {
                format!("'{}'", replacement.replace('\'', "%27"))
            } else {
                replacement.clone()
            };
            Some((r.span, text))
        })
        .collect();

    splice(css, edits)
}

/// Apply non-overlapping edits in one pass. Overlapping edits after the
/// first are dropped.
fn splice(source: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(span, _)| span.start);

    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (span, text) in edits {
        if span.start < cursor {
            continue;
        }
        out.push_str(&source[cursor..span.start]);
        out.push_str(&text);
        cursor = span.end;
    }
    out.push_str(&source[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raws(css: &str) -> Vec<String> {
        scan_css(css).into_iter().map(|r| r.raw).collect()
    }

    #[test]
    fn test_finds_all_url_forms() {
        let css = r#"
            a { background: url(img/a.png); }
            b { background: url("img/b.png"); }
            c { background: url( 'img/c.png' ); }
        "#;
        assert_eq!(raws(css), vec!["img/a.png", "img/b.png", "img/c.png"]);
    }

    #[test]
    fn test_import_forms_get_css_hint() {
        let css = r#"@import "base.css"; @import url(theme.css); x { background: url(bg.png) }"#;
        let refs = scan_css(css);
        assert_eq!(refs.len(), 3);
        assert!(refs[0].import && refs[0].raw == "base.css");
        assert!(refs[1].import && refs[1].raw == "theme.css");
        assert!(!refs[2].import);
        assert_eq!(refs[2].hint(), None);
    }

    #[test]
    fn test_comments_and_data_uris_are_skipped() {
        let css = r#"
            /* a { background: url(old.png) } */
            b { background: url(data:image/png;base64,AAAA) }
            c { background: url(new.png) }
        "#;
        assert_eq!(raws(css), vec!["new.png"]);
    }

    #[test]
    fn test_rewrite_preserves_everything_else() {
        let css = "@font-face{src:url(\"../fonts/a.woff2\") format(\"woff2\"),url(../fonts/a.woff)}";
        let mut map = Replacements::new();
        map.insert("../fonts/a.woff2".into(), "../../cdn.example.com/fonts/a.woff2".into());
        map.insert("../fonts/a.woff".into(), "../../cdn.example.com/fonts/a.woff".into());

        assert_eq!(
            rewrite_css(css, &map),
            "@font-face{src:url(\"../../cdn.example.com/fonts/a.woff2\") format(\"woff2\"),url(../../cdn.example.com/fonts/a.woff)}"
        );
    }

    #[test]
    fn test_unquoted_value_is_quoted_when_needed() {
        let mut map = Replacements::new();
        map.insert("a.png".into(), "my dir/a.png".into());
        assert_eq!(
            rewrite_css("x{background:url(a.png)}", &map),
            "x{background:url('my dir/a.png')}"
        );
    }

    #[test]
    fn test_unknown_references_are_untouched() {
        let css = "x{background:url(a.png)} y{background:url(b.png)}";
        let mut map = Replacements::new();
        map.insert("b.png".into(), "img/b.png".into());
        assert_eq!(
            rewrite_css(css, &map),
            "x{background:url(a.png)} y{background:url(img/b.png)}"
        );
    }
}
