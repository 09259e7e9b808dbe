//! Feed data model, native-feed decoding, and feed serialization.
//!
//! - [`model`] - the article record, channel envelope, and request options
//! - [`parser`] - RSS/Atom bytes → article records via `feed-rs`
//! - [`assembler`] - the two output modes: pass-through rewriting of origin
//!   feed bytes, and deterministic RSS 2.0 synthesis from an envelope

mod assembler;
mod model;
mod parser;

pub use assembler::{rewrite_feed, synthesize, AssembleError, PassthroughSpec};
pub use model::{
    Article, FeedEnvelope, FeedOptions, LIMIT_RANGE, MAX_DESCRIPTION_OVERRIDE, MAX_TITLE_OVERRIDE,
};
pub use parser::{parse_feed, ParseError, ParsedFeed};
