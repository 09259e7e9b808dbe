use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::breaker::{CircuitBreaker, FailedUrlRegistry};
use super::gate::{GateClass, RateGate};
use crate::error::CoreError;

/// Response bodies larger than this are abandoned mid-stream.
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
/// Total attempts per fetch, including the first.
pub const MAX_ATTEMPTS: u32 = 3;
/// Timeout for discovery candidate probes.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_CAP_MS: u64 = 5000;
/// Window scanned for a `<meta charset>` when the header names none.
const CHARSET_SNIFF_WINDOW: usize = 4096;

/// Statuses classified as permanent for the URL: no retry, and the URL is
/// remembered in the failed-URL registry.
const NON_RETRYABLE: &[u16] = &[400, 401, 403, 404, 405, 406, 410, 451];

/// Errors that can occur while fetching from an origin.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, too many redirects)
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Permanent 4xx; never retried
    #[error("HTTP {status}")]
    ClientStatus { status: u16 },
    /// 5xx after all retry attempts
    #[error("HTTP {status} after {attempts} attempts")]
    ServerStatus { status: u16, attempts: u32 },
    /// Circuit open for this URL; no I/O was performed
    #[error("temporarily blocked, retry in {0:?}")]
    TemporarilyBlocked(Duration),
    /// The URL failed permanently within the registry TTL; no I/O performed
    #[error("recently failed (status {status:?})")]
    RecentlyFailed { status: Option<u16> },
    /// Response body exceeded the size cap
    #[error("response exceeded {0} bytes")]
    TooLarge(usize),
}

impl FetchError {
    /// Converts into the client-visible taxonomy, attaching the URL.
    pub fn into_core(self, url: &str) -> CoreError {
        match self {
            FetchError::Timeout(_) => CoreError::OriginTimeout(url.to_owned()),
            FetchError::Network(e) => CoreError::OriginUnreachable(format!("{url}: {e}")),
            FetchError::ClientStatus { status } => CoreError::OriginClient {
                status,
                url: url.to_owned(),
            },
            FetchError::ServerStatus { status, .. } => CoreError::OriginServer {
                status,
                url: url.to_owned(),
            },
            FetchError::TemporarilyBlocked(remaining) => CoreError::OriginBlocked {
                url: url.to_owned(),
                retry_after_secs: remaining.as_secs().max(1),
            },
            FetchError::RecentlyFailed { status } => CoreError::OriginClient {
                status: status.unwrap_or(400),
                url: url.to_owned(),
            },
            FetchError::TooLarge(cap) => {
                CoreError::OriginUnreachable(format!("{url}: response exceeded {cap} bytes"))
            }
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Timeout(_) | FetchError::ServerStatus { .. }
        )
    }
}

/// What the caller can observe about a response without the body.
#[derive(Debug, Clone)]
pub struct HeadReport {
    pub status: u16,
    /// URL after redirects
    pub effective_url: String,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub last_modified: Option<String>,
    /// From the Content-Type header, or sniffed from `<meta charset>` in
    /// the first 4 KiB of the body
    pub charset: Option<String>,
}

/// A fetched body plus its observations.
#[derive(Debug)]
pub struct Body {
    pub bytes: Vec<u8>,
    pub report: HeadReport,
}

impl Body {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Result of a ranged request.
#[derive(Debug)]
pub enum RangeOutcome {
    /// Origin honoured the range (206)
    Partial(Body),
    /// Origin ignored the range; body truncated client-side
    Unsupported(Body),
}

/// Per-call fetch knobs.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub gate: GateClass,
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl FetchOptions {
    pub fn standard(timeout: Duration) -> Self {
        Self {
            gate: GateClass::Standard,
            timeout,
            max_bytes: MAX_BODY_SIZE,
        }
    }

    /// Tighter budget for discovery probes.
    pub fn discovery() -> Self {
        Self {
            gate: GateClass::Discovery,
            timeout: DISCOVERY_TIMEOUT,
            max_bytes: MAX_BODY_SIZE,
        }
    }
}

/// Rate-shaped, retrying, circuit-broken HTTP front end for the pipeline.
///
/// All outbound traffic flows through one `Fetcher`: the shared client
/// keeps connection pooling effective, the [`RateGate`] spaces out request
/// starts, the [`CircuitBreaker`] fast-fails URLs that keep failing, and
/// the [`FailedUrlRegistry`] remembers permanent 4xx outcomes for a while.
pub struct Fetcher {
    client: reqwest::Client,
    gate: Arc<RateGate>,
    breaker: CircuitBreaker,
    failed: Arc<FailedUrlRegistry>,
    default_timeout: Duration,
}

impl Fetcher {
    pub fn new(
        client: reqwest::Client,
        gate: Arc<RateGate>,
        failed: Arc<FailedUrlRegistry>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            client,
            gate,
            breaker: CircuitBreaker::new(),
            failed,
            default_timeout,
        }
    }

    /// Swaps in a custom breaker policy; used by tests to shrink windows.
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn failed_urls(&self) -> &FailedUrlRegistry {
        &self.failed
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// GET with retries, returning the body and its observations.
    ///
    /// Retry policy: up to [`MAX_ATTEMPTS`] attempts with exponential
    /// backoff `1000·2^(n-1)` ms capped at 5 s. 5xx, timeouts, and network
    /// errors retry; the permanent 4xx set does not and lands the URL in
    /// the failed registry for its TTL. The circuit breaker counts one
    /// failure per terminal outcome and resets on 2xx.
    pub async fn get_body(&self, url: &str, opts: FetchOptions) -> Result<Body, FetchError> {
        self.preflight(url)?;

        let mut attempt: u32 = 1;
        loop {
            match self.attempt_get(url, opts).await {
                Ok(body) => {
                    self.breaker.record_success(url);
                    return Ok(body);
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        url = %url,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(mut e) => {
                    if let FetchError::ServerStatus { attempts, .. } = &mut e {
                        *attempts = attempt;
                    }
                    self.record_terminal_failure(url, &e);
                    return Err(e);
                }
            }
        }
    }

    /// Single HEAD probe (no retries, no body).
    pub async fn head(&self, url: &str) -> Result<HeadReport, FetchError> {
        self.preflight(url)?;
        self.gate.acquire(GateClass::Standard).await;

        let response = tokio::time::timeout(self.default_timeout, self.client.head(url).send())
            .await
            .map_err(|_| FetchError::Timeout(self.default_timeout))?
            .map_err(FetchError::Network)?;

        let status = response.status();
        let report = report_from(&response, None);
        if status.is_success() {
            self.breaker.record_success(url);
            Ok(report)
        } else {
            let e = classify_status(status.as_u16(), MAX_ATTEMPTS);
            self.record_terminal_failure(url, &e);
            Err(e)
        }
    }

    /// GET with a `Range: bytes=0-(first_bytes-1)` header. Origins that
    /// ignore the range get their body truncated client-side instead.
    pub async fn get_range(
        &self,
        url: &str,
        first_bytes: usize,
    ) -> Result<RangeOutcome, FetchError> {
        self.preflight(url)?;
        self.gate.acquire(GateClass::Standard).await;

        let request = self
            .client
            .get(url)
            .header("Range", format!("bytes=0-{}", first_bytes.saturating_sub(1)));
        let response = tokio::time::timeout(self.default_timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout(self.default_timeout))?
            .map_err(FetchError::Network)?;

        let status = response.status().as_u16();
        match status {
            206 => {
                let report_meta = response_meta(&response);
                let bytes = read_capped(response, first_bytes, true).await?;
                self.breaker.record_success(url);
                Ok(RangeOutcome::Partial(assemble_body(bytes, report_meta)))
            }
            200..=299 => {
                let report_meta = response_meta(&response);
                let bytes = read_capped(response, first_bytes, true).await?;
                self.breaker.record_success(url);
                Ok(RangeOutcome::Unsupported(assemble_body(bytes, report_meta)))
            }
            _ => {
                let e = classify_status(status, 1);
                self.record_terminal_failure(url, &e);
                Err(e)
            }
        }
    }

    /// Registry and breaker checks shared by every public entry point; runs
    /// before any network I/O.
    fn preflight(&self, url: &str) -> Result<(), FetchError> {
        if let Some(entry) = self.failed.lookup(url) {
            tracing::debug!(url = %url, status = ?entry.status, "URL recently failed, skipping");
            return Err(FetchError::RecentlyFailed {
                status: entry.status,
            });
        }
        self.breaker.check(url).map_err(FetchError::TemporarilyBlocked)
    }

    async fn attempt_get(&self, url: &str, opts: FetchOptions) -> Result<Body, FetchError> {
        self.gate.acquire(opts.gate).await;

        let response = tokio::time::timeout(opts.timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout(opts.timeout))?
            .map_err(FetchError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), 1));
        }

        let meta = response_meta(&response);
        let bytes = read_capped(response, opts.max_bytes, false).await?;
        Ok(assemble_body(bytes, meta))
    }

    fn record_terminal_failure(&self, url: &str, error: &FetchError) {
        // Fast-fail outcomes did no I/O and must not feed back into the
        // failure counters
        if matches!(
            error,
            FetchError::TemporarilyBlocked(_) | FetchError::RecentlyFailed { .. }
        ) {
            return;
        }
        let failures = self.breaker.record_failure(url);
        tracing::debug!(url = %url, failures = failures, error = %error, "Recorded fetch failure");

        if let FetchError::ClientStatus { status } = error {
            if NON_RETRYABLE.contains(status) {
                self.failed.record(url, Some(*status));
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let ms = BACKOFF_BASE_MS.saturating_mul(1 << (attempt - 1));
    Duration::from_millis(ms.min(BACKOFF_CAP_MS))
}

fn classify_status(status: u16, attempts: u32) -> FetchError {
    if (500..600).contains(&status) {
        FetchError::ServerStatus { status, attempts }
    } else {
        FetchError::ClientStatus { status }
    }
}

struct ResponseMeta {
    status: u16,
    effective_url: String,
    content_type: Option<String>,
    content_length: Option<u64>,
    last_modified: Option<String>,
}

fn response_meta(response: &reqwest::Response) -> ResponseMeta {
    let headers = response.headers();
    ResponseMeta {
        status: response.status().as_u16(),
        effective_url: response.url().to_string(),
        content_type: headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        content_length: response.content_length(),
        last_modified: headers
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    }
}

fn report_from(response: &reqwest::Response, body: Option<&[u8]>) -> HeadReport {
    let meta = response_meta(response);
    let charset = detect_charset(meta.content_type.as_deref(), body.unwrap_or(&[]));
    HeadReport {
        status: meta.status,
        effective_url: meta.effective_url,
        content_type: meta.content_type,
        content_length: meta.content_length,
        last_modified: meta.last_modified,
        charset,
    }
}

fn assemble_body(bytes: Vec<u8>, meta: ResponseMeta) -> Body {
    let charset = detect_charset(meta.content_type.as_deref(), &bytes);
    Body {
        bytes,
        report: HeadReport {
            status: meta.status,
            effective_url: meta.effective_url,
            content_type: meta.content_type,
            content_length: meta.content_length,
            last_modified: meta.last_modified,
            charset,
        },
    }
}

/// Reads the body with a size cap using stream-based reading. With
/// `truncate` the cap is a stopping point instead of an error.
async fn read_capped(
    response: reqwest::Response,
    cap: usize,
    truncate: bool,
) -> Result<Vec<u8>, FetchError> {
    if !truncate {
        if let Some(len) = response.content_length() {
            if len as usize > cap {
                return Err(FetchError::TooLarge(cap));
            }
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > cap {
            if truncate {
                let room = cap - bytes.len();
                bytes.extend_from_slice(&chunk[..room]);
                return Ok(bytes);
            }
            return Err(FetchError::TooLarge(cap));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// Charset from the Content-Type header, falling back to a scan of the
/// first [`CHARSET_SNIFF_WINDOW`] bytes for `<meta charset>` or the
/// `http-equiv` form.
fn detect_charset(content_type: Option<&str>, body: &[u8]) -> Option<String> {
    if let Some(ct) = content_type {
        if let Some(cs) = charset_param(ct) {
            return Some(cs);
        }
    }

    let window = &body[..body.len().min(CHARSET_SNIFF_WINDOW)];
    let head = String::from_utf8_lossy(window).to_lowercase();

    if let Some(pos) = head.find("charset=") {
        let rest = &head[pos + "charset=".len()..];
        let value: String = rest
            .trim_start_matches(['"', '\''])
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if !value.is_empty() {
            return Some(value);
        }
    }
    None
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("charset="))
        .map(|cs| cs.trim_matches(['"', '\'']).to_ascii_lowercase())
        .filter(|cs| !cs.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_fetcher() -> Fetcher {
        let client = super::super::client::build_client("feedforge-test").unwrap();
        Fetcher::new(
            client,
            Arc::new(RateGate::with_gaps(Duration::ZERO, Duration::ZERO)),
            Arc::new(FailedUrlRegistry::new()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_get_body_success_reports_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html>hello</html>", "text/html; charset=UTF-8")
                    .insert_header("Last-Modified", "Tue, 01 Jul 2025 00:00:00 GMT"),
            )
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let url = format!("{}/page", server.uri());
        let body = fetcher
            .get_body(&url, FetchOptions::standard(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(body.report.status, 200);
        assert_eq!(body.report.charset.as_deref(), Some("utf-8"));
        assert_eq!(
            body.report.last_modified.as_deref(),
            Some("Tue, 01 Jul 2025 00:00:00 GMT")
        );
        assert_eq!(body.text(), "<html>hello</html>");
    }

    #[tokio::test]
    async fn test_charset_sniffed_from_meta() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><head><meta charset=\"windows-1252\"></head></html>"),
            )
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let body = fetcher
            .get_body(
                &format!("{}/x", server.uri()),
                FetchOptions::standard(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(body.report.charset.as_deref(), Some("windows-1252"));
    }

    #[tokio::test]
    async fn test_permanent_4xx_single_call_then_registry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(406))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let url = format!("{}/not-acceptable", server.uri());

        let err = fetcher
            .get_body(&url, FetchOptions::standard(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ClientStatus { status: 406 }));

        // Second call fast-fails from the registry without touching the wire
        let err = fetcher
            .get_body(&url, FetchOptions::standard(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::RecentlyFailed { status: Some(406) }
        ));
    }

    #[tokio::test]
    async fn test_5xx_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let err = fetcher
            .get_body(
                &format!("{}/flaky", server.uri()),
                FetchOptions::standard(Duration::from_secs(5)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ServerStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_5xx_then_success_recovers() {
        use wiremock::matchers::any;

        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let body = fetcher
            .get_body(
                &format!("{}/recovers", server.uri()),
                FetchOptions::standard(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(body.text(), "ok");
    }

    #[tokio::test]
    async fn test_circuit_opens_after_three_terminal_failures() {
        let server = MockServer::start().await;
        // 3 calls × 3 attempts each
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(9)
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let url = format!("{}/down", server.uri());
        let opts = FetchOptions::standard(Duration::from_secs(5));

        for _ in 0..3 {
            let err = fetcher.get_body(&url, opts).await.unwrap_err();
            assert!(matches!(err, FetchError::ServerStatus { .. }));
        }

        // Fourth call fast-fails synchronously; the mock's expect(9) proves
        // no further HTTP was issued
        let err = fetcher.get_body(&url, opts).await.unwrap_err();
        assert!(matches!(err, FetchError::TemporarilyBlocked(_)));
    }

    #[tokio::test]
    async fn test_body_size_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096]))
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let opts = FetchOptions {
            gate: GateClass::Standard,
            timeout: Duration::from_secs(5),
            max_bytes: 1024,
        };
        let err = fetcher
            .get_body(&format!("{}/big", server.uri()), opts)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge(1024)));
    }

    #[tokio::test]
    async fn test_get_range_unsupported_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; 2048]))
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let outcome = fetcher
            .get_range(&format!("{}/rng", server.uri()), 100)
            .await
            .unwrap();
        match outcome {
            RangeOutcome::Unsupported(body) => assert_eq!(body.bytes.len(), 100),
            RangeOutcome::Partial(_) => panic!("mock does not honour ranges"),
        }
    }

    #[tokio::test]
    async fn test_head_reports_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let report = fetcher.head(&format!("{}/feed", server.uri())).await.unwrap();
        assert_eq!(report.status, 200);
        assert_eq!(report.content_type.as_deref(), Some("application/rss+xml"));
    }

    #[test]
    fn test_backoff_progression_caps_at_five_seconds() {
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(4), Duration::from_millis(5000));
    }

    #[test]
    fn test_charset_param_parsing() {
        assert_eq!(
            charset_param("text/html; charset=ISO-8859-1").as_deref(),
            Some("iso-8859-1")
        );
        assert_eq!(charset_param("text/html").as_deref(), None);
    }
}
