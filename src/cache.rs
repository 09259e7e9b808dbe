//! Content cache: assembled feed bytes keyed by page URL and options.
//!
//! Independent from the discovery cache: clearing one never clears the
//! other. Reads never promote entries, so the LRU order of the backing
//! store is insertion order, which is what the overflow eviction policy
//! wants. Concurrent misses for one key coalesce onto a single producer.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::error::CoreError;
use crate::feed::FeedOptions;

/// Soft upper bound on cached entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;
/// On overflow, the oldest fifth of entries is evicted.
const EVICT_DIVISOR: usize = 5;

/// Content-type tag stored with the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedContentType {
    Rss,
    Atom,
}

impl FeedContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedContentType::Rss => "application/rss+xml; charset=utf-8",
            FeedContentType::Atom => "application/atom+xml; charset=utf-8",
        }
    }
}

/// A cached, fully-assembled feed. Bytes are shared, so clones are cheap.
#[derive(Debug, Clone)]
pub struct CachedFeed {
    pub bytes: Arc<Vec<u8>>,
    pub content_type: FeedContentType,
    /// Wall-clock insertion time, surfaced as `Last-Modified`.
    pub built_at: DateTime<Utc>,
}

/// Cache key: 16 hex chars of the URL hash plus 8 of the options hash.
/// A function of `(normalized url, canonical options)` only.
pub fn cache_key(url: &Url, opts: &FeedOptions) -> String {
    let url_hash = hex_digest(url.as_str().as_bytes());
    let opts_hash = hex_digest(opts.canonical().as_bytes());
    format!("{}{}", &url_hash[..16], &opts_hash[..8])
}

/// Prefix shared by every entry for a page URL, regardless of options.
pub fn page_key_prefix(url: &Url) -> String {
    hex_digest(url.as_str().as_bytes())[..16].to_owned()
}

/// Entity tag for the feed response headers: first 16 hex chars of
/// `sha256(url || canonical options)`.
pub fn etag(url: &Url, opts: &FeedOptions) -> String {
    let digest = hex_digest(format!("{}{}", url.as_str(), opts.canonical()).as_bytes());
    digest[..16].to_owned()
}

fn hex_digest(input: &[u8]) -> String {
    format!("{:x}", Sha256::digest(input))
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

struct Entry {
    feed: CachedFeed,
    inserted: Instant,
}

type ProducerFuture = Shared<BoxFuture<'static, Result<CachedFeed, Arc<CoreError>>>>;

pub struct ContentCache {
    ttl: Duration,
    capacity: usize,
    store: Mutex<LruCache<String, Entry>>,
    inflight: Mutex<HashMap<String, ProducerFuture>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ContentCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            store: Mutex::new(LruCache::unbounded()),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache read with lazy expiry. Counts toward the hit/miss statistics.
    pub fn get(&self, key: &str) -> Option<CachedFeed> {
        match self.lookup(key) {
            Some(feed) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(feed)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Single-flight generation: the first caller for a key runs the
    /// producer on a spawned task; everyone else awaits the same result.
    /// A producer failure propagates to all waiters identically. The
    /// spawned task completes and populates the cache even if every waiter
    /// goes away.
    pub async fn produce<F>(self: &Arc<Self>, key: String, producer: F) -> Result<CachedFeed, CoreError>
    where
        F: Future<Output = Result<CachedFeed, CoreError>> + Send + 'static,
    {
        // A concurrent producer may have finished between the caller's
        // get() and now
        if let Some(feed) = self.lookup(&key) {
            return Ok(feed);
        }

        let shared = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = inflight.get(&key) {
                existing.clone()
            } else {
                let cache = Arc::clone(self);
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let result = producer.await.map_err(Arc::new);
                    if let Ok(feed) = &result {
                        cache.insert(&task_key, feed.clone());
                    }
                    cache
                        .inflight
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&task_key);
                    result
                });
                let fut: ProducerFuture = async move {
                    handle
                        .await
                        .map_err(|e| Arc::new(CoreError::Internal(format!("producer task failed: {e}"))))?
                }
                .boxed()
                .shared();
                inflight.insert(key.clone(), fut.clone());
                fut
            }
        };

        shared.await.map_err(|e| (*e).clone())
    }

    fn lookup(&self, key: &str) -> Option<CachedFeed> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        match store.peek(key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => Some(entry.feed.clone()),
            Some(_) => {
                store.pop(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: &str, feed: CachedFeed) {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.push(
            key.to_owned(),
            Entry {
                feed,
                inserted: Instant::now(),
            },
        );
        if store.len() > self.capacity {
            let evict = (self.capacity / EVICT_DIVISOR).max(1);
            for _ in 0..evict {
                if store.pop_lru().is_none() {
                    break;
                }
            }
            tracing::debug!(evicted = evict, "Cache over capacity, evicted oldest entries");
        }
    }

    /// Drops expired entries; the sweep task calls this every five minutes.
    pub fn evict_expired(&self) -> usize {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<String> = store
            .iter()
            .filter(|(_, entry)| entry.inserted.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            store.pop(key);
        }
        expired.len()
    }

    /// Removes everything and resets the hit/miss counters.
    pub fn clear(&self) {
        self.store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Removes every entry for a page URL, across all option variants.
    pub fn clear_by_page(&self, url: &Url) -> usize {
        let prefix = page_key_prefix(url);
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let matching: Vec<String> = store
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            store.pop(key);
        }
        matching.len()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.store.lock().unwrap_or_else(|e| e.into_inner()).len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries,
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::normalize_page_url;
    use std::sync::atomic::AtomicUsize;

    fn feed_bytes(tag: &str) -> CachedFeed {
        CachedFeed {
            bytes: Arc::new(tag.as_bytes().to_vec()),
            content_type: FeedContentType::Rss,
            built_at: Utc::now(),
        }
    }

    fn opts_with_limit(limit: usize) -> FeedOptions {
        FeedOptions {
            limit: Some(limit),
            ..Default::default()
        }
    }

    #[test]
    fn test_cache_key_shape_and_determinism() {
        let url = normalize_page_url("https://example.com/news").unwrap();
        let opts = opts_with_limit(5);

        let key = cache_key(&url, &opts);
        assert_eq!(key.len(), 24);
        assert_eq!(key, cache_key(&url, &opts));
        assert!(key.starts_with(&page_key_prefix(&url)));
    }

    #[test]
    fn test_cache_key_varies_with_inputs() {
        let a = normalize_page_url("https://example.com/a").unwrap();
        let b = normalize_page_url("https://example.com/b").unwrap();
        let opts = FeedOptions::default();

        assert_ne!(cache_key(&a, &opts), cache_key(&b, &opts));
        assert_ne!(cache_key(&a, &opts), cache_key(&a, &opts_with_limit(3)));
        // Same page, different options: shared prefix
        assert_eq!(
            cache_key(&a, &opts)[..16],
            cache_key(&a, &opts_with_limit(3))[..16]
        );
    }

    #[tokio::test]
    async fn test_get_miss_then_hit() {
        let cache = Arc::new(ContentCache::new(Duration::from_secs(60)));
        assert!(cache.get("k1").is_none());

        cache.insert("k1", feed_bytes("payload"));
        let hit = cache.get("k1").unwrap();
        assert_eq!(&*hit.bytes, b"payload");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_lazily() {
        let cache = Arc::new(ContentCache::new(Duration::from_secs(60)));
        cache.insert("k", feed_bytes("old"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired_sweep() {
        let cache = Arc::new(ContentCache::new(Duration::from_secs(60)));
        cache.insert("old", feed_bytes("old"));
        tokio::time::advance(Duration::from_secs(61)).await;
        cache.insert("fresh", feed_bytes("fresh"));

        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.get("fresh").is_some());
    }

    #[tokio::test]
    async fn test_overflow_evicts_oldest_fifth() {
        let cache = Arc::new(ContentCache::with_capacity(Duration::from_secs(60), 10));
        for i in 0..11 {
            cache.insert(&format!("key-{i:02}"), feed_bytes(&i.to_string()));
        }
        // 11 entries overflowed a capacity of 10: the 2 oldest go
        let stats = cache.stats();
        assert_eq!(stats.entries, 9);
        assert!(cache.lookup("key-00").is_none());
        assert!(cache.lookup("key-01").is_none());
        assert!(cache.lookup("key-02").is_some());
        assert!(cache.lookup("key-10").is_some());
    }

    #[tokio::test]
    async fn test_clear_resets_counters() {
        let cache = Arc::new(ContentCache::new(Duration::from_secs(60)));
        cache.insert("k", feed_bytes("x"));
        cache.get("k");
        cache.get("missing");

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_clear_by_page_removes_all_option_variants() {
        let cache = Arc::new(ContentCache::new(Duration::from_secs(60)));
        let page = normalize_page_url("https://example.com/news").unwrap();
        let other = normalize_page_url("https://example.com/other").unwrap();

        cache.insert(&cache_key(&page, &FeedOptions::default()), feed_bytes("a"));
        cache.insert(&cache_key(&page, &opts_with_limit(3)), feed_bytes("b"));
        cache.insert(&cache_key(&other, &FeedOptions::default()), feed_bytes("c"));

        assert_eq!(cache.clear_by_page(&page), 2);
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_produce_coalesces_concurrent_misses() {
        let cache = Arc::new(ContentCache::new(Duration::from_secs(60)));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .produce("same-key".to_owned(), async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(feed_bytes("shared"))
                    })
                    .await
            }));
        }

        let mut bodies = Vec::new();
        for handle in handles {
            bodies.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1, "exactly one producer ran");
        for body in &bodies {
            assert_eq!(body.bytes, bodies[0].bytes);
        }
        // Result landed in the cache for later readers
        assert!(cache.get("same-key").is_some());
    }

    #[tokio::test]
    async fn test_produce_failure_propagates_to_all_waiters() {
        let cache = Arc::new(ContentCache::new(Duration::from_secs(60)));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .produce("failing".to_owned(), async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(CoreError::NoArticles("https://example.com/".into()))
                    })
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, CoreError::NoArticles(_)));
        }
        // Failures are not cached; the next produce runs again
        let result = cache
            .produce("failing".to_owned(), async { Ok(feed_bytes("recovered")) })
            .await
            .unwrap();
        assert_eq!(&*result.bytes, b"recovered");
    }
}
