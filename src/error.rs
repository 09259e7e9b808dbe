use thiserror::Error;

use crate::util::UrlError;

/// Terminal outcome of a feed request, one variant per client-visible kind.
///
/// Individual components keep their own narrower error enums; everything
/// converges into `CoreError` at the orchestrator boundary, where it maps
/// onto an HTTP status for the router.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    /// Malformed URL, blocked host, or out-of-range options.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Fetch exceeded its deadline.
    #[error("origin timed out: {0}")]
    OriginTimeout(String),

    /// DNS or connection failure before any HTTP response.
    #[error("origin unreachable: {0}")]
    OriginUnreachable(String),

    /// The circuit for this URL is open; no I/O was attempted.
    #[error("origin temporarily blocked: {url}")]
    OriginBlocked { url: String, retry_after_secs: u64 },

    /// Permanent 4xx from the origin (no retries were issued).
    #[error("origin returned {status} for {url}")]
    OriginClient { status: u16, url: String },

    /// 5xx from the origin after retries were exhausted.
    #[error("origin returned {status} for {url} after retries")]
    OriginServer { status: u16, url: String },

    /// HTML was unusable or a feed body would not parse.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Extraction produced no valid articles.
    #[error("no articles found at {0}")]
    NoArticles(String),

    /// Client-facing shedding (the admission layer owns this kind).
    #[error("rate limited")]
    RateLimited,

    /// Unexpected failure; the message is masked in production mode.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// HTTP status the router presents for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::InvalidInput(_) => 400,
            CoreError::NoArticles(_) => 404,
            CoreError::OriginTimeout(_) => 408,
            CoreError::ParseFailure(_) => 422,
            CoreError::RateLimited => 429,
            CoreError::Internal(_) => 500,
            CoreError::OriginUnreachable(_)
            | CoreError::OriginBlocked { .. }
            | CoreError::OriginClient { .. }
            | CoreError::OriginServer { .. } => 502,
        }
    }

    /// Stable machine-readable code for the client error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "INVALID_INPUT",
            CoreError::OriginTimeout(_) => "ORIGIN_TIMEOUT",
            CoreError::OriginUnreachable(_) => "ORIGIN_UNREACHABLE",
            CoreError::OriginBlocked { .. } => "ORIGIN_BLOCKED",
            CoreError::OriginClient { .. } => "ORIGIN_CLIENT_ERROR",
            CoreError::OriginServer { .. } => "ORIGIN_SERVER_ERROR",
            CoreError::ParseFailure(_) => "PARSE_FAILURE",
            CoreError::NoArticles(_) => "NO_ARTICLES",
            CoreError::RateLimited => "RATE_LIMITED",
            CoreError::Internal(_) => "INTERNAL",
        }
    }

    /// Operational errors carry their real message to clients even in
    /// production; non-operational ones are masked.
    pub fn is_operational(&self) -> bool {
        !matches!(self, CoreError::Internal(_))
    }
}

impl From<UrlError> for CoreError {
    fn from(e: UrlError) -> Self {
        CoreError::InvalidInput(e.to_string())
    }
}
