//! The orchestrator: strategy selection between native pass-through and
//! HTML synthesis, plus the per-outcome statistics.
//!
//! [`FeedService`] is the dependency-injected context that owns every other
//! component; nothing below it reaches across module boundaries. It is the
//! only component that sees the fetcher, discovery engine, extractor,
//! parser, assembler, and cache together.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::cache::{cache_key, CachedFeed, ContentCache, FeedContentType};
use crate::config::Config;
use crate::discover::{DiscoveryCapabilities, DiscoveryEngine, DiscoveryOutcome};
use crate::error::CoreError;
use crate::extract::extract;
use crate::feed::{
    parse_feed, rewrite_feed, synthesize, Article, FeedEnvelope, FeedOptions, PassthroughSpec,
};
use crate::fetch::{build_client, FailedUrlRegistry, FetchOptions, Fetcher, RateGate};
use crate::util::{normalize_page_url, registrable_domain, validate_public};

/// Interval between proactive cache sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Counters kept per request outcome.
#[derive(Default)]
pub struct ServiceStats {
    discovery_hits: Mutex<BTreeMap<&'static str, u64>>,
    passthrough_count: AtomicU64,
    synthesized_count: AtomicU64,
    passthrough_latency_us: AtomicU64,
    synthesized_latency_us: AtomicU64,
}

impl ServiceStats {
    fn record_discovery(&self, strategy: &'static str) {
        let mut hits = self.discovery_hits.lock().unwrap_or_else(|e| e.into_inner());
        *hits.entry(strategy).or_insert(0) += 1;
    }

    fn record_passthrough(&self, elapsed: Duration) {
        self.passthrough_count.fetch_add(1, Ordering::Relaxed);
        self.passthrough_latency_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_synthesized(&self, elapsed: Duration) {
        self.synthesized_count.fetch_add(1, Ordering::Relaxed);
        self.synthesized_latency_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub discovery_hits: BTreeMap<String, u64>,
    pub passthrough_count: u64,
    pub synthesized_count: u64,
    pub avg_passthrough_latency_ms: f64,
    pub avg_synthesized_latency_ms: f64,
    pub cache: crate::cache::CacheStats,
}

/// Metadata report for `GET /metadata`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteMetadata {
    pub url: String,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_strategy: Option<String>,
    pub article_count: usize,
    pub sample: Vec<Article>,
}

/// Report for `POST /validate`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub accessible: bool,
    #[serde(rename = "canScrape")]
    pub can_scrape: bool,
    #[serde(rename = "hasRSSFeed")]
    pub has_rss_feed: bool,
    #[serde(rename = "rssUrl", skip_serializing_if = "Option::is_none")]
    pub rss_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The feed pipeline behind every endpoint.
#[derive(Clone)]
pub struct FeedService {
    config: Config,
    fetcher: Arc<Fetcher>,
    discovery: Arc<DiscoveryEngine>,
    cache: Arc<ContentCache>,
    stats: Arc<ServiceStats>,
    generator: String,
}

impl FeedService {
    pub fn from_config(config: Config) -> Result<Self, CoreError> {
        Self::with_capabilities(config, DiscoveryCapabilities::default())
    }

    pub fn with_capabilities(
        config: Config,
        caps: DiscoveryCapabilities,
    ) -> Result<Self, CoreError> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| crate::fetch::DEFAULT_USER_AGENT.to_owned());
        let client = build_client(&user_agent)
            .map_err(|e| CoreError::Internal(format!("http client construction failed: {e}")))?;

        let gate = Arc::new(RateGate::new());
        let failed = Arc::new(FailedUrlRegistry::new());
        let fetcher = Arc::new(Fetcher::new(client, gate, failed, config.request_timeout()));
        let discovery = Arc::new(DiscoveryEngine::new(
            fetcher.clone(),
            caps,
            config.allow_private_networks,
        ));
        let cache = Arc::new(ContentCache::new(config.cache_duration()));

        Ok(Self {
            generator: format!("feedforge/{}", env!("CARGO_PKG_VERSION")),
            config,
            fetcher,
            discovery,
            cache,
            stats: Arc::new(ServiceStats::default()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The request decision function: cache, then discovery, then either
    /// pass-through or synthesis, with the result stored under the key.
    pub async fn feed(&self, raw_url: &str, opts: FeedOptions) -> Result<CachedFeed, CoreError> {
        let page = self.check_url(raw_url)?;
        opts.validate()?;

        let key = cache_key(&page, &opts);
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(page = %page, "Content cache hit");
            return Ok(hit);
        }

        let service = self.clone();
        self.cache
            .produce(key, async move { service.generate(&page, &opts).await })
            .await
    }

    async fn generate(&self, page: &Url, opts: &FeedOptions) -> Result<CachedFeed, CoreError> {
        let started = tokio::time::Instant::now();
        let limit = opts.effective_limit(self.config.max_articles);

        if let DiscoveryOutcome::Found { feed_url, strategy } = self.discovery.discover(page).await
        {
            self.stats.record_discovery(strategy.name());
            let body = self
                .fetcher
                .get_body(
                    feed_url.as_str(),
                    FetchOptions::standard(self.config.request_timeout()),
                )
                .await
                .map_err(|e| e.into_core(feed_url.as_str()))?;

            let build_time = Utc::now();
            match parse_feed(&body.bytes, feed_url.as_str(), build_time) {
                Ok(_) => {
                    let self_link = self.self_link(page, opts);
                    let spec = PassthroughSpec {
                        overrides: opts,
                        limit,
                        generator: &self.generator,
                        self_link: &self_link,
                        build_time,
                    };
                    let bytes = rewrite_feed(&body.bytes, &spec)?;
                    self.stats.record_passthrough(started.elapsed());
                    return Ok(CachedFeed {
                        bytes: Arc::new(bytes),
                        content_type: FeedContentType::Rss,
                        built_at: build_time,
                    });
                }
                Err(e) => {
                    // Downgraded to a path switch, never a visible failure
                    tracing::warn!(
                        feed = %feed_url,
                        error = %e,
                        "Discovered feed did not parse, falling back to synthesis"
                    );
                }
            }
        }

        let html = self
            .fetcher
            .get_body(
                page.as_str(),
                FetchOptions::standard(self.config.request_timeout()),
            )
            .await
            .map_err(|e| e.into_core(page.as_str()))?;

        let build_time = Utc::now();
        let articles = extract(&html.text(), page, limit, build_time)?;
        let envelope = self.envelope(page, articles, opts, build_time);
        let bytes = synthesize(&envelope)?;
        self.stats.record_synthesized(started.elapsed());

        Ok(CachedFeed {
            bytes: Arc::new(bytes),
            content_type: FeedContentType::Rss,
            built_at: build_time,
        })
    }

    /// Articles only, no assembly. Backs `GET /preview`.
    pub async fn preview(
        &self,
        raw_url: &str,
        limit: Option<usize>,
        page_index: usize,
    ) -> Result<Vec<Article>, CoreError> {
        let page = self.check_url(raw_url)?;
        let opts = FeedOptions {
            limit,
            ..Default::default()
        };
        opts.validate()?;
        let per_page = opts.effective_limit(self.config.max_articles);

        let (articles, _) = self.acquire_articles(&page).await?;
        Ok(articles
            .into_iter()
            .skip(page_index.saturating_mul(per_page))
            .take(per_page)
            .collect())
    }

    /// Backs `GET /metadata`.
    pub async fn metadata(&self, raw_url: &str) -> Result<SiteMetadata, CoreError> {
        let page = self.check_url(raw_url)?;
        let (articles, discovered) = self.acquire_articles(&page).await?;

        let (feed_url, strategy) = match discovered {
            Some((url, strategy)) => (Some(url), Some(strategy.to_owned())),
            None => (None, None),
        };

        Ok(SiteMetadata {
            url: page.to_string(),
            domain: registrable_domain(&page).to_owned(),
            feed_url,
            discovery_strategy: strategy,
            article_count: articles.len(),
            sample: articles.into_iter().take(3).collect(),
        })
    }

    /// Backs `POST /validate`.
    pub async fn validate_target(&self, raw_url: &str) -> Result<ValidationReport, CoreError> {
        let page = self.check_url(raw_url)?;

        let (has_rss_feed, rss_url) = match self.discovery.discover(&page).await {
            DiscoveryOutcome::Found { feed_url, .. } => (true, Some(feed_url.to_string())),
            _ => (false, None),
        };

        let fetch = self
            .fetcher
            .get_body(
                page.as_str(),
                FetchOptions::standard(self.config.request_timeout()),
            )
            .await;

        let (accessible, can_scrape, reason) = match fetch {
            Ok(body) => {
                let build_time = Utc::now();
                match extract(&body.text(), &page, self.config.max_articles, build_time) {
                    Ok(articles) => (true, !articles.is_empty(), None),
                    Err(_) => (true, false, Some("no extractable articles".to_owned())),
                }
            }
            Err(e) => (false, false, Some(e.into_core(page.as_str()).to_string())),
        };

        Ok(ValidationReport {
            accessible,
            can_scrape,
            has_rss_feed,
            rss_url,
            reason,
        })
    }

    /// Clears the content cache (all of it, or one page's entries).
    /// Discovery outcomes are cached separately and stay put.
    pub fn clear_cache(&self, raw_url: Option<&str>) -> Result<usize, CoreError> {
        match raw_url {
            Some(raw) => {
                let page = self.check_url(raw)?;
                Ok(self.cache.clear_by_page(&page))
            }
            None => {
                self.cache.clear();
                Ok(0)
            }
        }
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let hits = self
            .stats
            .discovery_hits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| ((*k).to_owned(), *v))
            .collect();
        let passthrough_count = self.stats.passthrough_count.load(Ordering::Relaxed);
        let synthesized_count = self.stats.synthesized_count.load(Ordering::Relaxed);
        let avg = |total_us: u64, count: u64| {
            if count == 0 {
                0.0
            } else {
                total_us as f64 / count as f64 / 1000.0
            }
        };

        StatsSnapshot {
            discovery_hits: hits,
            passthrough_count,
            synthesized_count,
            avg_passthrough_latency_ms: avg(
                self.stats.passthrough_latency_us.load(Ordering::Relaxed),
                passthrough_count,
            ),
            avg_synthesized_latency_ms: avg(
                self.stats.synthesized_latency_us.load(Ordering::Relaxed),
                synthesized_count,
            ),
            cache: self.cache.stats(),
        }
    }

    /// Runs the 5-minute sweep over every TTL-bounded store.
    pub fn sweep(&self) {
        let cache = self.cache.evict_expired();
        let discovery = self.discovery.evict_expired();
        let failed = self.fetcher.failed_urls().purge_expired();
        if cache + discovery + failed > 0 {
            tracing::debug!(
                cache = cache,
                discovery = discovery,
                failed_urls = failed,
                "Sweep evicted expired entries"
            );
        }
    }

    /// Shared acquisition for preview/metadata: native feed when one
    /// exists and parses, HTML extraction otherwise.
    async fn acquire_articles(
        &self,
        page: &Url,
    ) -> Result<(Vec<Article>, Option<(String, &'static str)>), CoreError> {
        if let DiscoveryOutcome::Found { feed_url, strategy } = self.discovery.discover(page).await
        {
            let discovered = Some((feed_url.to_string(), strategy.name()));
            let body = self
                .fetcher
                .get_body(
                    feed_url.as_str(),
                    FetchOptions::standard(self.config.request_timeout()),
                )
                .await
                .map_err(|e| e.into_core(feed_url.as_str()))?;
            match parse_feed(&body.bytes, feed_url.as_str(), Utc::now()) {
                Ok(parsed) => return Ok((parsed.articles, discovered)),
                Err(e) => {
                    tracing::warn!(feed = %feed_url, error = %e, "Feed unparseable, extracting HTML");
                }
            }
        }

        let html = self
            .fetcher
            .get_body(
                page.as_str(),
                FetchOptions::standard(self.config.request_timeout()),
            )
            .await
            .map_err(|e| e.into_core(page.as_str()))?;
        let articles = extract(&html.text(), page, self.config.max_articles, Utc::now())?;
        Ok((articles, None))
    }

    fn check_url(&self, raw: &str) -> Result<Url, CoreError> {
        let url = normalize_page_url(raw)?;
        if !self.config.allow_private_networks {
            validate_public(&url)?;
        }
        Ok(url)
    }

    fn envelope(
        &self,
        page: &Url,
        articles: Vec<Article>,
        opts: &FeedOptions,
        build_time: chrono::DateTime<Utc>,
    ) -> FeedEnvelope {
        let host = page.host_str().unwrap_or("unknown");
        FeedEnvelope {
            title: opts
                .title
                .clone()
                .unwrap_or_else(|| format!("Feed for {host}")),
            description: opts
                .description
                .clone()
                .unwrap_or_else(|| format!("Articles extracted from {page}")),
            site_link: page.to_string(),
            self_link: self.self_link(page, opts),
            language: None,
            categories: Vec::new(),
            ttl_minutes: self.config.ttl_minutes(),
            generator: self.generator.clone(),
            build_time,
            items: articles,
        }
    }

    fn self_link(&self, page: &Url, opts: &FeedOptions) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(page.as_str().as_bytes()).collect();
        let mut link = format!(
            "{}/feed?url={}",
            self.config.base_url.trim_end_matches('/'),
            encoded
        );
        if let Some(limit) = opts.limit {
            link.push_str(&format!("&limit={limit}"));
        }
        link
    }
}
