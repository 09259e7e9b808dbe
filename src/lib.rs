//! feedforge: turn any website URL into an RSS 2.0 feed.
//!
//! The pipeline behind a feed request, in dependency order:
//!
//! 1. [`fetch`] - rate-shaped, retrying, circuit-broken HTTP
//! 2. [`feed`] - article model, native RSS/Atom decoding, feed assembly
//! 3. [`extract`] - article mining from arbitrary HTML
//! 4. [`discover`] - locating an authoritative feed for a page URL
//! 5. [`cache`] - keyed feed-bytes cache with coalescing
//! 6. [`orchestrator`] - pass-through vs. synthesis decision, statistics
//!
//! The [`server`] module is a thin axum adapter; all behaviour lives in
//! the library so tests can drive the pipeline directly.

pub mod cache;
pub mod config;
pub mod discover;
pub mod error;
pub mod extract;
pub mod feed;
pub mod fetch;
pub mod orchestrator;
pub mod server;
pub mod util;

pub use config::Config;
pub use error::CoreError;
pub use orchestrator::FeedService;
