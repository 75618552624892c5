use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::ConfigError;
use crate::token_bucket::TokenBucket;

// One token bucket per client identity, created full on first sight.
// The DashMap entry guard holds the shard lock for the whole
// get-or-create + refill + take sequence, so concurrent first requests
// from one identity share a single bucket.
pub struct RateLimiterRegistry {
    buckets: DashMap<String, TokenBucket>,
    rate_per_second: f64,
    burst: u32,
    retry_after: Duration,
}

impl RateLimiterRegistry {
    pub fn new(rate_per_second: f64, burst: u32) -> Result<Self, ConfigError> {
        if !rate_per_second.is_finite() || rate_per_second <= 0.0 {
            return Err(ConfigError::InvalidRate(rate_per_second));
        }
        // 1/rate has to fit a Duration for the retry hint
        let retry_after = Duration::try_from_secs_f64(1.0 / rate_per_second)
            .map_err(|_| ConfigError::InvalidRate(rate_per_second))?;
        if burst == 0 {
            return Err(ConfigError::ZeroBurst);
        }
        Ok(Self {
            buckets: DashMap::new(),
            rate_per_second,
            burst,
            retry_after,
        })
    }

    pub fn allow(&self, identity: &str) -> bool {
        self.allow_at(identity, Instant::now())
    }

    pub fn allow_at(&self, identity: &str, now: Instant) -> bool {
        let mut bucket = self
            .buckets
            .entry(identity.to_string())
            .or_insert_with(|| TokenBucket::new_at(self.rate_per_second, self.burst, now));

        bucket.try_take_at(now)
    }

    /// Hint handed to denied callers: one refill period, ignoring any
    /// partially accrued token.
    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }

    // Whole seconds for the Retry-After header, never below 1
    pub fn retry_after_secs(&self) -> u64 {
        (self.retry_after().as_secs_f64().ceil() as u64).max(1)
    }

    /// Waits up to `max_wait` for a token to become available, then takes it.
    /// Only meant for tests and tooling; the request path never waits.
    pub async fn wait_for_token(&self, identity: &str, max_wait: Duration) -> bool {
        let start = Instant::now();
        loop {
            let now = Instant::now();
            let wait = {
                let mut bucket = self
                    .buckets
                    .entry(identity.to_string())
                    .or_insert_with(|| TokenBucket::new_at(self.rate_per_second, self.burst, now));
                if bucket.try_take_at(now) {
                    return true;
                }
                bucket.time_until_token_at(now)
            };

            if now.duration_since(start).saturating_add(wait) > max_wait {
                return false;
            }
            tokio::time::sleep(wait).await;
        }
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }

    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Drops buckets that have not been touched for longer than `idle_ttl`.
    pub fn sweep_idle(&self, idle_ttl: Duration) -> usize {
        self.sweep_idle_at(idle_ttl, Instant::now())
    }

    pub fn sweep_idle_at(&self, idle_ttl: Duration, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_seen()) <= idle_ttl);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, "evicted idle rate limiter buckets");
        }
        removed
    }
}
