//! Reference extraction and rewriting for archived documents.
//!
//! HTML goes through lol_html, stylesheets through a regex scanner. Both
//! report references as written and rewrite them from a raw → replacement
//! map, so callers decide what each reference becomes.

pub mod css;
pub mod html;
pub mod types;

pub use css::{extract_css_references, rewrite_css, scan_css};
pub use html::{extract_html_references, rewrite_html};
pub use types::{HtmlScan, RawReference, Replacements, RewriteError};
