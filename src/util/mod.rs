//! Utility functions shared across the pipeline.
//!
//! - **URL handling**: normalization of page URLs and security-focused
//!   validation to keep the fetcher off private networks
//! - **Text processing**: whitespace collapsing, character-budget
//!   truncation, and tag stripping for plain-text descriptions

mod text;
mod url;

pub use text::{collapse_whitespace, strip_tags, truncate_chars};
pub use url::{
    first_path_segment, normalize_page_url, normalize_public_url, origin_of, registrable_domain,
    validate_public, UrlError,
};
