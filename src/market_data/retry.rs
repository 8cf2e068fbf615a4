//! Exponential backoff with jitter for provider requests.
//!
//! The base delay is a pure function of the attempt number; jitter is layered
//! on top with a caller-supplied RNG so tests can pin it.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor per failed attempt (2.0 doubles).
    pub multiplier: f64,
    /// Fraction of the delay randomized in both directions (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        if capped.is_finite() && capped > 0.0 {
            Duration::from_millis(capped.round() as u64)
        } else {
            self.max_delay
        }
    }

    pub fn jittered<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.backoff(attempt);
        if self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let base_millis = base.as_millis() as f64;
        let range = base_millis * self.jitter_factor;
        let jitter: f64 = rng.gen_range(-range..=range);
        Duration::from_millis((base_millis + jitter).max(1.0) as u64)
    }

    /// Sleep before the next attempt. A server `Retry-After` raises the delay,
    /// but never past `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.jittered(attempt, &mut rand::thread_rng());
        match retry_after {
            Some(hint) => delay.max(hint.min(self.max_delay)),
            None => delay,
        }
    }

    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
