//! Feed discovery: turning a page URL into an authoritative feed URL.
//!
//! Strategies form a closed set traversed in a fixed order; the first
//! candidate that validates as a feed wins. Successful and negative
//! outcomes are cached for an hour; transient failures are not cached and
//! retry on the next call. The engine never raises; a strategy error is
//! logged at `warn` and the loop continues.

mod rules;

pub use rules::{candidates_for, rules_for, DomainRules, Pattern};

use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::fetch::{FetchError, FetchOptions, Fetcher, GateClass};
use crate::util::{origin_of, validate_public};

/// How long `Found` and `Negative` outcomes stay cached.
pub const DISCOVERY_CACHE_TTL: Duration = Duration::from_secs(3600);

/// A candidate body must be at least this long to count as a feed.
const MIN_FEED_BODY: usize = 50;

/// Lowercase substrings that identify RSS/Atom content.
const FEED_MARKERS: &[&str] = &[
    "<rss",
    "<feed",
    "<channel>",
    "xmlns=\"http://www.w3.org/2005/atom\"",
    "xmlns:atom=",
];

/// Candidates fetched per strategy for the fan-out strategies (sitemap,
/// robots, content mining); keeps the per-request fetch count bounded.
const MAX_FANOUT_CANDIDATES: usize = 5;

/// The closed set of discovery strategies, in traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    HtmlHead,
    DomainRule,
    UrlPattern,
    CommonPath,
    WordPress,
    Sitemap,
    Robots,
    ContentMine,
}

impl Strategy {
    /// Every strategy, in traversal order. The trailing three only run
    /// when their capability flag is set.
    pub const ALL: [Strategy; 8] = [
        Strategy::HtmlHead,
        Strategy::DomainRule,
        Strategy::UrlPattern,
        Strategy::CommonPath,
        Strategy::WordPress,
        Strategy::Sitemap,
        Strategy::Robots,
        Strategy::ContentMine,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::HtmlHead => "html-head",
            Strategy::DomainRule => "domain-rule",
            Strategy::UrlPattern => "url-pattern",
            Strategy::CommonPath => "common-path",
            Strategy::WordPress => "wordpress",
            Strategy::Sitemap => "sitemap",
            Strategy::Robots => "robots",
            Strategy::ContentMine => "content-mine",
        }
    }
}

/// Opt-in switches for the fetch-heavy strategies. All off by default:
/// they multiply the per-request fetch count beyond the rate budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryCapabilities {
    pub sitemap: bool,
    pub robots: bool,
    pub content_mine: bool,
}

impl DiscoveryCapabilities {
    fn enables(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::Sitemap => self.sitemap,
            Strategy::Robots => self.robots,
            Strategy::ContentMine => self.content_mine,
            _ => true,
        }
    }
}

/// Why discovery concluded there is no feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeReason {
    /// Every strategy ran and no candidate validated.
    NoFeedFound,
    /// The page URL itself failed permanently within the registry TTL.
    RecentlyFailed,
}

/// Result of a discovery run.
#[derive(Debug, Clone)]
pub enum DiscoveryOutcome {
    Found { feed_url: Url, strategy: Strategy },
    Negative(NegativeReason),
    /// Not cached; the next call retries.
    Transient(String),
}

struct CachedOutcome {
    outcome: DiscoveryOutcome,
    inserted: Instant,
}

struct StrategyError {
    transient: bool,
    message: String,
}

impl From<&FetchError> for StrategyError {
    fn from(e: &FetchError) -> Self {
        let transient = matches!(
            e,
            FetchError::Network(_)
                | FetchError::Timeout(_)
                | FetchError::ServerStatus { .. }
                | FetchError::TemporarilyBlocked(_)
        );
        StrategyError {
            transient,
            message: e.to_string(),
        }
    }
}

/// The discovery engine. Deterministic given the same cache state: the
/// strategy order is fixed and selectors/patterns within a strategy are
/// tried in declaration order.
pub struct DiscoveryEngine {
    fetcher: Arc<Fetcher>,
    caps: DiscoveryCapabilities,
    allow_private: bool,
    cache: Mutex<HashMap<String, CachedOutcome>>,
}

impl DiscoveryEngine {
    pub fn new(fetcher: Arc<Fetcher>, caps: DiscoveryCapabilities, allow_private: bool) -> Self {
        Self {
            fetcher,
            caps,
            allow_private,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Locates an existing feed for `page`, consulting the discovery cache
    /// first. Never returns an error: failures become `Negative` or
    /// `Transient` outcomes.
    pub async fn discover(&self, page: &Url) -> DiscoveryOutcome {
        let key = page.as_str().to_owned();

        if let Some(cached) = self.cache_lookup(&key) {
            tracing::debug!(page = %page, "Discovery cache hit");
            return cached;
        }

        if self.fetcher.failed_urls().lookup(page.as_str()).is_some() {
            return DiscoveryOutcome::Negative(NegativeReason::RecentlyFailed);
        }

        let mut saw_transient = false;
        for strategy in Strategy::ALL {
            if !self.caps.enables(strategy) {
                continue;
            }
            match self.run_strategy(strategy, page).await {
                Ok(Some(feed_url)) => {
                    tracing::info!(
                        page = %page,
                        feed = %feed_url,
                        strategy = strategy.name(),
                        "Feed discovered"
                    );
                    let outcome = DiscoveryOutcome::Found { feed_url, strategy };
                    self.cache_store(key, outcome.clone());
                    return outcome;
                }
                Ok(None) => {}
                Err(e) => {
                    saw_transient |= e.transient;
                    tracing::warn!(
                        page = %page,
                        strategy = strategy.name(),
                        error = %e.message,
                        "Discovery strategy failed, continuing"
                    );
                }
            }
        }

        if saw_transient {
            return DiscoveryOutcome::Transient("origin not reachable during discovery".into());
        }

        let outcome = DiscoveryOutcome::Negative(NegativeReason::NoFeedFound);
        self.cache_store(key, outcome.clone());
        outcome
    }

    /// Drops every cached outcome. The content cache is independent;
    /// clearing one never clears the other.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Drops expired outcomes; returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let before = cache.len();
        cache.retain(|_, entry| entry.inserted.elapsed() < DISCOVERY_CACHE_TTL);
        before - cache.len()
    }

    fn cache_lookup(&self, key: &str) -> Option<DiscoveryOutcome> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        match cache.get(key) {
            Some(entry) if entry.inserted.elapsed() < DISCOVERY_CACHE_TTL => {
                Some(entry.outcome.clone())
            }
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn cache_store(&self, key: String, outcome: DiscoveryOutcome) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            key,
            CachedOutcome {
                outcome,
                inserted: Instant::now(),
            },
        );
    }

    async fn run_strategy(
        &self,
        strategy: Strategy,
        page: &Url,
    ) -> Result<Option<Url>, StrategyError> {
        match strategy {
            Strategy::HtmlHead => self.html_head(page).await,
            Strategy::DomainRule => {
                let Some(rules) = rules_for(page) else {
                    return Ok(None);
                };
                self.probe_candidates(page, candidates_for(rules, page)).await
            }
            Strategy::UrlPattern => {
                self.probe_candidates(page, url_pattern_candidates(page)).await
            }
            Strategy::CommonPath => {
                let origin = origin_of(page);
                self.probe_candidates(page, vec![format!("{origin}/rss"), format!("{origin}/feed")])
                    .await
            }
            Strategy::WordPress => {
                let origin = origin_of(page);
                let page_base = page.as_str().trim_end_matches('/');
                self.probe_candidates(
                    page,
                    vec![format!("{page_base}/feed"), format!("{origin}/feed")],
                )
                .await
            }
            Strategy::Sitemap => self.sitemap(page).await,
            Strategy::Robots => self.robots(page).await,
            Strategy::ContentMine => self.content_mine(page).await,
        }
    }

    /// GET the page and probe `<link>` elements in the document head,
    /// most specific selector first.
    async fn html_head(&self, page: &Url) -> Result<Option<Url>, StrategyError> {
        let html = self.fetch_page(page).await?;
        let candidates = head_link_candidates(&html, page);
        self.probe_candidates(page, candidates).await
    }

    async fn sitemap(&self, page: &Url) -> Result<Option<Url>, StrategyError> {
        let origin = origin_of(page);
        let body = self.fetch_text(&format!("{origin}/sitemap.xml")).await?;
        let candidates = feedish_locs(&body);
        self.probe_candidates(page, candidates).await
    }

    async fn robots(&self, page: &Url) -> Result<Option<Url>, StrategyError> {
        let origin = origin_of(page);
        let body = self.fetch_text(&format!("{origin}/robots.txt")).await?;

        let sitemaps: Vec<String> = body
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.trim()
                    .eq_ignore_ascii_case("sitemap")
                    .then(|| value.trim().to_owned())
            })
            .take(2)
            .collect();

        for sitemap_url in sitemaps {
            let Ok(body) = self.fetch_text(&sitemap_url).await else {
                continue;
            };
            if let Some(found) = self.probe_candidates(page, feedish_locs(&body)).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Mines the page body for anchor links that look like feeds.
    async fn content_mine(&self, page: &Url) -> Result<Option<Url>, StrategyError> {
        let html = self.fetch_page(page).await?;
        let candidates = {
            let doc = Html::parse_document(&html);
            let Ok(selector) =
                Selector::parse(r#"a[href*="rss"], a[href*="feed"], a[href*="atom"]"#)
            else {
                return Ok(None);
            };
            let mut seen = Vec::new();
            for element in doc.select(&selector) {
                if let Some(href) = element.value().attr("href") {
                    if let Ok(resolved) = page.join(href) {
                        let s = resolved.to_string();
                        if !seen.contains(&s) {
                            seen.push(s);
                        }
                    }
                }
                if seen.len() >= MAX_FANOUT_CANDIDATES {
                    break;
                }
            }
            seen
        };
        self.probe_candidates(page, candidates).await
    }

    async fn fetch_page(&self, page: &Url) -> Result<String, StrategyError> {
        let opts = FetchOptions {
            gate: GateClass::Discovery,
            timeout: self.fetcher.default_timeout(),
            ..FetchOptions::discovery()
        };
        let body = self
            .fetcher
            .get_body(page.as_str(), opts)
            .await
            .map_err(|e| StrategyError::from(&e))?;
        Ok(body.text())
    }

    async fn fetch_text(&self, url: &str) -> Result<String, StrategyError> {
        let body = self
            .fetcher
            .get_body(url, FetchOptions::discovery())
            .await
            .map_err(|e| StrategyError::from(&e))?;
        Ok(body.text())
    }

    /// Probes candidates in order and returns the first that validates.
    /// Candidates that fetch but do not look like feeds are recorded in
    /// the failed-URL registry so later strategies and requests skip them.
    async fn probe_candidates(
        &self,
        page: &Url,
        candidates: Vec<String>,
    ) -> Result<Option<Url>, StrategyError> {
        for candidate in candidates {
            let Ok(url) = Url::parse(&candidate) else {
                continue;
            };
            if !self.allow_private && validate_public(&url).is_err() {
                tracing::debug!(candidate = %url, "Candidate rejected by host policy");
                continue;
            }

            match self.fetcher.get_body(url.as_str(), FetchOptions::discovery()).await {
                Ok(body) if looks_like_feed(&body.bytes) => return Ok(Some(url)),
                Ok(_) => {
                    tracing::debug!(page = %page, candidate = %url, "Candidate is not a feed");
                    self.fetcher.failed_urls().record(url.as_str(), None);
                }
                Err(FetchError::TemporarilyBlocked(_)) | Err(FetchError::RecentlyFailed { .. }) => {}
                Err(e) => {
                    tracing::debug!(page = %page, candidate = %url, error = %e, "Candidate probe failed");
                }
            }
        }
        Ok(None)
    }
}

/// Feed validation predicate: a plausible feed body is at least 50
/// bytes and contains a feed marker (case-insensitive).
pub fn looks_like_feed(bytes: &[u8]) -> bool {
    if bytes.len() < MIN_FEED_BODY {
        return false;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]).to_lowercase();
    FEED_MARKERS.iter().any(|marker| head.contains(marker))
}

/// Candidate hrefs from `<link>` elements, most specific selector first.
/// Returned resolved against the page URL, deduplicated, in order.
fn head_link_candidates(html: &str, page: &Url) -> Vec<String> {
    const SELECTORS: &[&str] = &[
        r#"link[type="application/rss+xml"]"#,
        r#"link[type="application/atom+xml"]"#,
        r#"link[rel="alternate"][type="application/rss+xml"], link[rel="alternate"][type="application/atom+xml"]"#,
        r#"link[rel="feed"]"#,
    ];

    let doc = Html::parse_document(html);
    let mut out = Vec::new();
    for selector_str in SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in doc.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if let Ok(resolved) = page.join(href) {
                let s = resolved.to_string();
                if !out.contains(&s) {
                    out.push(s);
                }
            }
        }
    }
    out
}

/// Path-shape inference: `/x` suggests `/rss/x.rss` and `/x/feed`; a root
/// path suggests `/rss/trang-chu.rss` and `/rss`.
fn url_pattern_candidates(page: &Url) -> Vec<String> {
    let origin = origin_of(page);
    let segments: Vec<&str> = page
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        [] => vec![
            format!("{origin}/rss/trang-chu.rss"),
            format!("{origin}/rss"),
        ],
        [segment] => vec![
            format!("{origin}/rss/{segment}.rss"),
            format!("{origin}/{segment}/feed"),
        ],
        _ => Vec::new(),
    }
}

/// `<loc>` values from a sitemap that look like feed URLs.
fn feedish_locs(body: &str) -> Vec<String> {
    let lower = body.to_lowercase();
    let mut out = Vec::new();
    let mut from = 0;

    while let Some(start) = lower[from..].find("<loc>") {
        let value_start = from + start + "<loc>".len();
        let Some(end) = lower[value_start..].find("</loc>") else {
            break;
        };
        let value = body[value_start..value_start + end].trim();
        let value_lower = &lower[value_start..value_start + end];
        if value_lower.contains("rss") || value_lower.contains("feed") || value_lower.contains("atom")
        {
            out.push(value.to_owned());
            if out.len() >= MAX_FANOUT_CANDIDATES {
                break;
            }
        }
        from = value_start + end + "</loc>".len();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::normalize_page_url;

    #[test]
    fn test_looks_like_feed_markers() {
        let rss = format!("<?xml version=\"1.0\"?><rss version=\"2.0\">{}</rss>", " ".repeat(60));
        assert!(looks_like_feed(rss.as_bytes()));

        let atom = format!(
            "<?xml version=\"1.0\"?><feed xmlns=\"http://www.w3.org/2005/Atom\">{}</feed>",
            " ".repeat(60)
        );
        assert!(looks_like_feed(atom.as_bytes()));

        assert!(!looks_like_feed(b"<rss>"), "under 50 bytes");
        let html = format!("<html><body>{}</body></html>", "x".repeat(100));
        assert!(!looks_like_feed(html.as_bytes()));
    }

    #[test]
    fn test_head_candidates_ordered_by_selector_specificity() {
        let page = normalize_page_url("https://example.com/blog").unwrap();
        let html = r#"<html><head>
            <link rel="feed" href="/weird-feed">
            <link rel="alternate" type="application/atom+xml" href="/atom.xml">
            <link rel="alternate" type="application/rss+xml" href="/rss.xml">
        </head><body></body></html>"#;

        let candidates = head_link_candidates(html, &page);
        assert_eq!(
            candidates,
            vec![
                "https://example.com/rss.xml",
                "https://example.com/atom.xml",
                "https://example.com/weird-feed",
            ]
        );
    }

    #[test]
    fn test_head_candidates_resolve_relative_hrefs() {
        let page = normalize_page_url("https://example.com/section/page").unwrap();
        let html = r#"<link rel="alternate" type="application/rss+xml" href="feed.xml">"#;
        let candidates = head_link_candidates(html, &page);
        assert_eq!(candidates, vec!["https://example.com/section/feed.xml"]);
    }

    #[test]
    fn test_url_pattern_single_segment() {
        let page = normalize_page_url("https://example.com/the-gioi").unwrap();
        assert_eq!(
            url_pattern_candidates(&page),
            vec![
                "https://example.com/rss/the-gioi.rss",
                "https://example.com/the-gioi/feed",
            ]
        );
    }

    #[test]
    fn test_url_pattern_root() {
        let page = normalize_page_url("https://example.com/").unwrap();
        assert_eq!(
            url_pattern_candidates(&page),
            vec![
                "https://example.com/rss/trang-chu.rss",
                "https://example.com/rss",
            ]
        );
    }

    #[test]
    fn test_url_pattern_deep_path_yields_nothing() {
        let page = normalize_page_url("https://example.com/a/b/c").unwrap();
        assert!(url_pattern_candidates(&page).is_empty());
    }

    #[test]
    fn test_feedish_locs_filters_and_caps() {
        let sitemap = r#"<?xml version="1.0"?><urlset>
            <url><loc>https://example.com/about</loc></url>
            <url><loc>https://example.com/rss/news.rss</loc></url>
            <url><loc>https://example.com/feed</loc></url>
        </urlset>"#;
        assert_eq!(
            feedish_locs(sitemap),
            vec!["https://example.com/rss/news.rss", "https://example.com/feed"]
        );
    }
}
