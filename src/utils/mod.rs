pub mod constants;
pub mod url_utils;

pub use constants::*;
pub use url_utils::{is_archivable_reference, resolve_link};
