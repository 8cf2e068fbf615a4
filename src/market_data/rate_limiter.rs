// Token bucket shared by every fetch task. Never rejects, only delays.
use parking_lot::Mutex;
use tokio::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Refills at `rate` tokens per second up to `capacity`.
///
/// `acquire` reserves tokens immediately and sleeps off any deficit, so the
/// balance can go negative: later callers queue behind earlier reservations
/// and a cost above `capacity` still completes instead of waiting forever.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(Bucket { tokens: capacity, last_refill: Instant::now() }),
            rate: requests_per_second.max(f64::MIN_POSITIVE),
            capacity,
        }
    }

    pub async fn acquire(&self, cost: u32) {
        let wait = self.reserve(f64::from(cost));
        if !wait.is_zero() {
            trace!(wait_ms = wait.as_millis() as u64, cost, "Rate limiter delaying request");
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (negative while reservations are outstanding).
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn reserve(&self, cost: f64) -> Duration {
        // Lock is held only for the accounting, never across the sleep
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens -= cost;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            // A vanishing rate saturates the wait rather than overflowing it
            Duration::try_from_secs_f64(-bucket.tokens / self.rate).unwrap_or(Duration::MAX)
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }
}
