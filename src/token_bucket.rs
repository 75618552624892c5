//! Token bucket with continuous refill.
//!
//! Tokens are tracked as `f64` so sub-second request spacing accrues
//! fractional credit instead of waiting for whole-token ticks.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate_per_second: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    // New buckets start full
    pub fn new_at(rate_per_second: f64, burst: u32, now: Instant) -> Self {
        let capacity = burst as f64;
        Self {
            rate_per_second,
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Takes one token if available. A denied call consumes nothing.
    pub fn try_take_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn available_at(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// How long until one whole token is available; zero if one already is.
    /// Saturates at `Duration::MAX` when the wait is not representable.
    pub fn time_until_token_at(&mut self, now: Instant) -> Duration {
        self.refill(now);
        let missing = 1.0 - self.tokens;
        if missing <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(missing / self.rate_per_second).unwrap_or(Duration::MAX)
    }

    pub fn last_seen(&self) -> Instant {
        self.last_refill
    }

    // Calls with a `now` older than the last refill accrue nothing
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let accrued = elapsed.as_secs_f64() * self.rate_per_second;
        self.tokens = (self.tokens + accrued).min(self.capacity);
        self.last_refill = now;
    }
}
