use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Consecutive failures that open the circuit for a URL.
pub const FAILURE_THRESHOLD: u32 = 3;
/// How long an open circuit stays open.
pub const BLOCK_DURATION: Duration = Duration::from_secs(300);
/// How long a permanent 4xx keeps a URL on the fast-fail list.
pub const FAILED_URL_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
struct CircuitState {
    failures: u32,
    blocked_until: Option<Instant>,
    last_outcome: Option<Outcome>,
}

/// Per-URL circuit breaker.
///
/// Any completion classified other than 2xx/3xx counts as a failure; at
/// [`FAILURE_THRESHOLD`] the URL is blocked for [`BLOCK_DURATION`] and all
/// calls during the window fail fast without network I/O. A 2xx resets the
/// counter. Per-URL updates are serialized by the map lock.
pub struct CircuitBreaker {
    threshold: u32,
    block_for: Duration,
    states: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_policy(FAILURE_THRESHOLD, BLOCK_DURATION)
    }

    pub fn with_policy(threshold: u32, block_for: Duration) -> Self {
        Self {
            threshold,
            block_for,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Fast-fail check before any I/O. Returns the remaining block time when
    /// the circuit is open. An expired block resets the counter so the next
    /// attempt starts clean.
    pub fn check(&self, url: &str) -> Result<(), Duration> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let Some(state) = states.get_mut(url) else {
            return Ok(());
        };
        if let Some(until) = state.blocked_until {
            let now = Instant::now();
            if now < until {
                return Err(until - now);
            }
            state.failures = 0;
            state.blocked_until = None;
        }
        Ok(())
    }

    /// Records a terminal failure. Returns the updated consecutive count.
    pub fn record_failure(&self, url: &str) -> u32 {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states.entry(url.to_owned()).or_insert(CircuitState {
            failures: 0,
            blocked_until: None,
            last_outcome: None,
        });
        state.failures += 1;
        state.last_outcome = Some(Outcome::Failure);
        if state.failures >= self.threshold {
            state.blocked_until = Some(Instant::now() + self.block_for);
            tracing::info!(
                url = %url,
                failures = state.failures,
                "Circuit opened, blocking URL"
            );
        }
        state.failures
    }

    /// A 2xx completion resets the failure counter.
    pub fn record_success(&self, url: &str) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = states.get_mut(url) {
            state.failures = 0;
            state.blocked_until = None;
            state.last_outcome = Some(Outcome::Success);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FailedEntry {
    /// Status that put the URL here; `None` when a discovery candidate
    /// failed feed validation rather than the fetch itself.
    pub status: Option<u16>,
    recorded: Instant,
}

/// URLs that recently failed permanently: non-retryable 4xx responses and
/// discovery candidates that did not validate as feeds. Lookups purge lazily;
/// the cache sweep calls [`FailedUrlRegistry::purge_expired`] as well.
pub struct FailedUrlRegistry {
    ttl: Duration,
    entries: Mutex<HashMap<String, FailedEntry>>,
}

impl FailedUrlRegistry {
    pub fn new() -> Self {
        Self::with_ttl(FAILED_URL_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, url: &str) -> Option<FailedEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(url) {
            Some(entry) if entry.recorded.elapsed() < self.ttl => Some(*entry),
            Some(_) => {
                entries.remove(url);
                None
            }
            None => None,
        }
    }

    pub fn record(&self, url: &str, status: Option<u16>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            url.to_owned(),
            FailedEntry {
                status,
                recorded: Instant::now(),
            },
        );
    }

    /// Drops entries past their TTL; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.recorded.elapsed() < self.ttl);
        before - entries.len()
    }
}

impl Default for FailedUrlRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://example.com/feed";

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new();
        assert!(breaker.check(URL).is_ok());

        breaker.record_failure(URL);
        breaker.record_failure(URL);
        assert!(breaker.check(URL).is_ok());

        breaker.record_failure(URL);
        assert!(breaker.check(URL).is_err());
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let breaker = CircuitBreaker::new();
        breaker.record_failure(URL);
        breaker.record_failure(URL);
        breaker.record_success(URL);
        breaker.record_failure(URL);
        breaker.record_failure(URL);
        assert!(breaker.check(URL).is_ok(), "counter should have reset");
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_expires_and_resets() {
        let breaker = CircuitBreaker::new();
        for _ in 0..3 {
            breaker.record_failure(URL);
        }
        assert!(breaker.check(URL).is_err());

        tokio::time::advance(BLOCK_DURATION + Duration::from_secs(1)).await;
        assert!(breaker.check(URL).is_ok());

        // One new failure must not immediately re-open the circuit
        breaker.record_failure(URL);
        assert!(breaker.check(URL).is_ok());
    }

    #[tokio::test]
    async fn test_urls_tracked_independently() {
        let breaker = CircuitBreaker::new();
        for _ in 0..3 {
            breaker.record_failure("https://a.example.com/");
        }
        assert!(breaker.check("https://a.example.com/").is_err());
        assert!(breaker.check("https://b.example.com/").is_ok());
    }

    #[tokio::test]
    async fn test_registry_records_and_looks_up() {
        let registry = FailedUrlRegistry::new();
        assert!(registry.lookup(URL).is_none());

        registry.record(URL, Some(406));
        let entry = registry.lookup(URL).unwrap();
        assert_eq!(entry.status, Some(406));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_entry_expires() {
        let registry = FailedUrlRegistry::new();
        registry.record(URL, Some(404));

        tokio::time::advance(FAILED_URL_TTL + Duration::from_secs(1)).await;
        assert!(registry.lookup(URL).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_purge_expired() {
        let registry = FailedUrlRegistry::new();
        registry.record("https://a.example.com/", Some(404));
        tokio::time::advance(FAILED_URL_TTL + Duration::from_secs(1)).await;
        registry.record("https://b.example.com/", Some(410));

        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.lookup("https://b.example.com/").is_some());
    }
}
