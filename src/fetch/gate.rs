use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Which minimum gap applies to a request.
///
/// Discovery probes fan out several candidate fetches per page, so they run
/// under a wider gap than ordinary fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateClass {
    Standard,
    Discovery,
}

/// Process-wide minimum-interval gate over all outbound requests.
///
/// Every fetch acquires the gate before its request starts; the gate
/// guarantees that consecutive starts are at least the class gap apart.
/// Waiters are woken in arrival order: the internal `tokio::sync::Mutex`
/// queues acquirers FIFO, and the sleep happens while holding it.
pub struct RateGate {
    standard_gap: Duration,
    discovery_gap: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl RateGate {
    pub const DEFAULT_GAP: Duration = Duration::from_millis(100);
    pub const DISCOVERY_GAP: Duration = Duration::from_millis(200);

    pub fn new() -> Self {
        Self::with_gaps(Self::DEFAULT_GAP, Self::DISCOVERY_GAP)
    }

    pub fn with_gaps(standard_gap: Duration, discovery_gap: Duration) -> Self {
        Self {
            standard_gap,
            discovery_gap,
            last_start: Mutex::new(None),
        }
    }

    /// Waits until this caller may start a request, then records the start.
    pub async fn acquire(&self, class: GateClass) {
        let gap = match class {
            GateClass::Standard => self.standard_gap,
            GateClass::Discovery => self.discovery_gap,
        };

        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            let next_allowed = prev + gap;
            if next_allowed > Instant::now() {
                tokio::time::sleep_until(next_allowed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_starts_respect_gap() {
        let gate = RateGate::new();

        let t0 = Instant::now();
        gate.acquire(GateClass::Standard).await;
        gate.acquire(GateClass::Standard).await;
        let elapsed = t0.elapsed();

        assert!(
            elapsed >= Duration::from_millis(100),
            "second start after {elapsed:?}, expected >= 100ms"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_gap_is_wider() {
        let gate = RateGate::new();

        gate.acquire(GateClass::Standard).await;
        let t0 = Instant::now();
        gate.acquire(GateClass::Discovery).await;

        assert!(t0.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_wake_in_arrival_order() {
        let gate = Arc::new(RateGate::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                gate.acquire(GateClass::Standard).await;
                order.lock().unwrap().push(i);
            }));
            // Let each task reach the mutex queue before spawning the next
            tokio::task::yield_now().await;
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_gap_elapsed() {
        let gate = RateGate::new();
        gate.acquire(GateClass::Standard).await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        let t0 = Instant::now();
        gate.acquire(GateClass::Standard).await;
        assert_eq!(t0.elapsed(), Duration::ZERO);
    }
}
