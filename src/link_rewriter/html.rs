//! HTML reference extraction and rewriting using lol_html
//!
//! Both passes run over the same element table, so every attribute value the
//! extractor reports is seen with the identical spelling by the rewriter.

use std::cell::RefCell;

use lol_html::html_content::{ContentType, Element};
use lol_html::{HtmlRewriter, Settings, element, text};

use super::css::{extract_css_references, rewrite_css};
use super::types::{HtmlScan, RawReference, Replacements, RewriteError, lookup};
use crate::resource_kind::ResourceKind;
use crate::utils::is_archivable_reference;

/// How an attribute's value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrValue {
    Single,
    Srcset,
}

#[derive(Debug, Clone, Copy)]
struct AttrRule {
    selector: &'static str,
    attr: &'static str,
    hint: Option<ResourceKind>,
    navigational: bool,
    value: AttrValue,
}

const fn embedded(selector: &'static str, attr: &'static str, hint: Option<ResourceKind>) -> AttrRule {
    AttrRule {
        selector,
        attr,
        hint,
        navigational: false,
        value: AttrValue::Single,
    }
}

const fn srcset(selector: &'static str) -> AttrRule {
    AttrRule {
        selector,
        attr: "srcset",
        hint: None,
        navigational: false,
        value: AttrValue::Srcset,
    }
}

const fn anchor(selector: &'static str) -> AttrRule {
    AttrRule {
        selector,
        attr: "href",
        hint: Some(ResourceKind::Html),
        navigational: true,
        value: AttrValue::Single,
    }
}

/// Attribute references other than `<link href>`, which depends on `rel`
const ATTR_RULES: &[AttrRule] = &[
    embedded("script[src]", "src", None),
    embedded("img[src]", "src", None),
    srcset("img[srcset]"),
    embedded("source[src]", "src", None),
    srcset("source[srcset]"),
    embedded("video[src]", "src", None),
    embedded("video[poster]", "poster", None),
    embedded("audio[src]", "src", None),
    embedded("track[src]", "src", None),
    embedded("embed[src]", "src", None),
    embedded("object[data]", "data", None),
    embedded("input[src]", "src", None),
    embedded("iframe[src]", "src", Some(ResourceKind::Html)),
    embedded("frame[src]", "src", Some(ResourceKind::Html)),
    anchor("a[href]"),
    anchor("area[href]"),
];

/// Classify a `<link>` by its `rel` (and `as`) attribute.
///
/// `None` means the link is not a fetchable resource (canonical, alternate,
/// next, ...) and stays as written.
fn link_hint(el: &Element) -> Option<Option<ResourceKind>> {
    let rel = el.get_attribute("rel")?.to_ascii_lowercase();
    let tokens: Vec<&str> = rel.split_ascii_whitespace().collect();

    if tokens.contains(&"stylesheet") {
        return Some(Some(ResourceKind::Css));
    }
    if tokens.iter().any(|t| matches!(*t, "preload" | "prefetch")) {
        let as_style = el
            .get_attribute("as")
            .is_some_and(|v| v.eq_ignore_ascii_case("style"));
        return Some(as_style.then_some(ResourceKind::Css));
    }
    let asset = tokens.iter().any(|t| {
        matches!(
            *t,
            "icon" | "apple-touch-icon" | "apple-touch-icon-precomposed" | "mask-icon" | "modulepreload" | "manifest"
        )
    });
    asset.then_some(None)
}

/// Parse a `srcset` value into `(url, descriptor)` candidates.
///
/// URLs run until whitespace, so `data:` URLs containing commas stay whole.
pub(crate) fn srcset_candidates(value: &str) -> Vec<(&str, &str)> {
    let bytes = value.as_bytes();
    let mut candidates = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b',') {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let url_start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let url = &value[url_start..pos];

        if let Some(trimmed) = url.strip_suffix(',') {
            candidates.push((trimmed.trim_end_matches(','), ""));
            continue;
        }

        let desc_start = pos;
        let mut depth = 0usize;
        while pos < bytes.len() {
            match bytes[pos] {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => break,
                _ => {}
            }
            pos += 1;
        }
        candidates.push((url, value[desc_start..pos].trim()));
    }

    candidates
}

fn rewrite_srcset(value: &str, replacements: &Replacements) -> Option<String> {
    let candidates = srcset_candidates(value);
    let mut changed = false;
    let rewritten: Vec<String> = candidates
        .into_iter()
        .map(|(url, descriptor)| {
            let url = match lookup(replacements, url) {
                Some(replacement) => {
                    changed = true;
                    replacement.as_str()
                }
                None => url,
            };
            if descriptor.is_empty() {
                url.to_string()
            } else {
                format!("{url} {descriptor}")
            }
        })
        .collect();

    changed.then(|| rewritten.join(", "))
}

fn push_attr_references(out: &mut Vec<RawReference>, rule: &AttrRule, value: &str) {
    match rule.value {
        AttrValue::Single => {
            if is_archivable_reference(value) {
                out.push(if rule.navigational {
                    RawReference::anchor(value)
                } else {
                    RawReference::embedded(value, rule.hint)
                });
            }
        }
        AttrValue::Srcset => {
            for (url, _) in srcset_candidates(value) {
                if is_archivable_reference(url) {
                    out.push(RawReference::embedded(url, None));
                }
            }
        }
    }
}

fn decode_style(value: &str) -> String {
    html_escape::decode_html_entities(value).into_owned()
}

/// Collect every reference in an HTML document.
///
/// # Errors
///
/// Returns `RewriteError::Html` when lol_html rejects the input.
pub fn extract_html_references(html: &[u8]) -> Result<HtmlScan, RewriteError> {
    let scan_cell = RefCell::new(HtmlScan::default());
    let scan = &scan_cell;
    let mut style_buffer = String::new();

    {
        let mut handlers = vec![
            element!("base[href]", |el| {
                let mut scan = scan.borrow_mut();
                if scan.base_href.is_none()
                    && let Some(href) = el.get_attribute("href")
                {
                    scan.base_href = Some(href.trim().to_string());
                }
                Ok(())
            }),
            element!("link[href]", |el| {
                if let Some(hint) = link_hint(el)
                    && let Some(href) = el.get_attribute("href")
                    && is_archivable_reference(&href)
                {
                    scan.borrow_mut()
                        .references
                        .push(RawReference::embedded(&href, hint));
                }
                Ok(())
            }),
            element!("*[style]", |el| {
                if let Some(style) = el.get_attribute("style") {
                    let refs = extract_css_references(&decode_style(&style));
                    scan.borrow_mut().references.extend(refs);
                }
                Ok(())
            }),
            text!("style", |t| {
                style_buffer.push_str(t.as_str());
                if t.last_in_text_node() {
                    let refs = extract_css_references(&style_buffer);
                    scan.borrow_mut().references.extend(refs);
                    style_buffer.clear();
                }
                Ok(())
            }),
        ];

        for rule in ATTR_RULES {
            handlers.push(element!(rule.selector, move |el| {
                if let Some(value) = el.get_attribute(rule.attr) {
                    push_attr_references(&mut scan.borrow_mut().references, rule, &value);
                }
                Ok(())
            }));
        }

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: handlers,
                ..Settings::default()
            },
            |_: &[u8]| {},
        );

        rewriter
            .write(html)
            .map_err(|e| RewriteError::Html(e.to_string()))?;
        rewriter
            .end()
            .map_err(|e| RewriteError::Html(e.to_string()))?;
    }

    Ok(scan_cell.into_inner())
}

/// Rewrite every reference that has a replacement and drop `<base>`.
///
/// References without a replacement are left exactly as written.
///
/// # Errors
///
/// Returns `RewriteError::Html` when lol_html rejects the input.
pub fn rewrite_html(html: &[u8], replacements: &Replacements) -> Result<Vec<u8>, RewriteError> {
    let mut output = Vec::with_capacity(html.len());
    let mut style_buffer = String::new();

    {
        let mut handlers = vec![
            element!("base", |el| {
                if el.has_attribute("href") {
                    el.remove();
                }
                Ok(())
            }),
            element!("link[href]", |el| {
                if link_hint(el).is_some()
                    && let Some(href) = el.get_attribute("href")
                    && let Some(replacement) = lookup(replacements, &href)
                {
                    el.set_attribute("href", replacement)?;
                }
                Ok(())
            }),
            element!("*[style]", |el| {
                if let Some(style) = el.get_attribute("style") {
                    let decoded = decode_style(&style);
                    let rewritten = rewrite_css(&decoded, replacements);
                    if rewritten != decoded {
                        el.set_attribute("style", &rewritten)?;
                    }
                }
                Ok(())
            }),
            text!("style", |t| {
                style_buffer.push_str(t.as_str());
                if t.last_in_text_node() {
                    let rewritten = rewrite_css(&style_buffer, replacements);
                    t.replace(&rewritten, ContentType::Html);
                    style_buffer.clear();
                } else {
                    t.remove();
                }
                Ok(())
            }),
        ];

        for rule in ATTR_RULES {
            handlers.push(element!(rule.selector, move |el| {
                if let Some(value) = el.get_attribute(rule.attr) {
                    let rewritten = match rule.value {
                        AttrValue::Single => lookup(replacements, &value).cloned(),
                        AttrValue::Srcset => rewrite_srcset(&value, replacements),
                    };
                    if let Some(rewritten) = rewritten {
                        el.set_attribute(rule.attr, &rewritten)?;
                    }
                }
                Ok(())
            }));
        }

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: handlers,
                ..Settings::default()
            },
            |c: &[u8]| output.extend_from_slice(c),
        );

        rewriter
            .write(html)
            .map_err(|e| RewriteError::Html(e.to_string()))?;
        rewriter
            .end()
            .map_err(|e| RewriteError::Html(e.to_string()))?;
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <base href="https://cdn.example.com/site/">
  <link rel="stylesheet" href="css/site.css">
  <link rel="icon" href="favicon.ico">
  <link rel="canonical" href="https://example.com/">
  <style>body { background: url("img/bg.png") }</style>
  <script src="js/app.js"></script>
</head>
<body>
  <img src="img/logo.png" srcset="img/logo@2x.png 2x, img/logo@3x.png 3x">
  <div style="background-image: url(img/hero.jpg)"></div>
  <a href="about.html#team">About</a>
  <a href="mailto:hi@example.com">Mail</a>
  <iframe src="embed/player"></iframe>
</body>
</html>"#;

    fn raw_list(scan: &HtmlScan) -> Vec<&str> {
        scan.references.iter().map(|r| r.raw.as_str()).collect()
    }

    #[test]
    fn test_extracts_every_reference_kind() {
        let scan = extract_html_references(PAGE.as_bytes()).unwrap();
        let raws = raw_list(&scan);

        assert_eq!(scan.base_href.as_deref(), Some("https://cdn.example.com/site/"));
        for expected in [
            "css/site.css",
            "favicon.ico",
            "img/bg.png",
            "js/app.js",
            "img/logo.png",
            "img/logo@2x.png",
            "img/logo@3x.png",
            "img/hero.jpg",
            "about.html#team",
            "embed/player",
        ] {
            assert!(raws.contains(&expected), "missing {expected} in {raws:?}");
        }
        assert!(!raws.contains(&"https://example.com/"));
        assert!(!raws.iter().any(|r| r.starts_with("mailto:")));
    }

    #[test]
    fn test_reference_hints() {
        let scan = extract_html_references(PAGE.as_bytes()).unwrap();
        let find = |raw: &str| scan.references.iter().find(|r| r.raw == raw).unwrap();

        assert_eq!(find("css/site.css").hint, Some(ResourceKind::Css));
        assert_eq!(find("embed/player").hint, Some(ResourceKind::Html));
        assert_eq!(find("img/logo.png").hint, None);
        assert!(find("about.html#team").navigational);
        assert!(!find("js/app.js").navigational);
    }

    #[test]
    fn test_rewrite_replaces_known_references_and_drops_base() {
        let mut map = Replacements::new();
        map.insert("css/site.css".into(), "../cdn.example.com/site/css/site.css".into());
        map.insert("img/bg.png".into(), "../cdn.example.com/site/img/bg.png".into());
        map.insert("img/logo@2x.png".into(), "logo2.png".into());
        map.insert("img/hero.jpg".into(), "hero.jpg".into());

        let out = String::from_utf8(rewrite_html(PAGE.as_bytes(), &map).unwrap()).unwrap();

        assert!(!out.contains("<base"));
        assert!(out.contains(r#"href="../cdn.example.com/site/css/site.css""#));
        assert!(out.contains(r#"url("../cdn.example.com/site/img/bg.png")"#));
        assert!(out.contains(r#"srcset="logo2.png 2x, img/logo@3x.png 3x""#));
        assert!(out.contains("url(hero.jpg)"));
        // Unmapped references are untouched
        assert!(out.contains(r#"src="js/app.js""#));
        assert!(out.contains(r#"href="https://example.com/""#));
        assert!(out.contains(r#"href="mailto:hi@example.com""#));
    }

    #[test]
    fn test_srcset_with_data_uri_stays_whole() {
        let candidates = srcset_candidates("data:image/png;base64,AA,BB 1x, b.png 2x,c.png");
        assert_eq!(
            candidates,
            vec![
                ("data:image/png;base64,AA,BB", "1x"),
                ("b.png", "2x"),
                ("c.png", ""),
            ]
        );
    }

    #[test]
    fn test_entity_encoded_attribute_matches_decoded_key() {
        let html = r#"<img src="img.php?w=10&amp;h=20">"#;
        let mut map = Replacements::new();
        map.insert("img.php?w=10&h=20".into(), "example.com/img_w_10_h_20.php".into());

        let out = String::from_utf8(rewrite_html(html.as_bytes(), &map).unwrap()).unwrap();
        assert!(out.contains("example.com/img_w_10_h_20.php"));
    }
}
