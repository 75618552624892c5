//! Per-identity concurrency ceiling with a cooldown block.
//!
//! Every admitted unit of work must be released exactly once; the
//! [`ConnectionGuard`] returned by [`ConnectionTracker::acquire`] does that
//! on drop, which covers normal completion, handler errors, panics and
//! cancelled request futures alike.
//!
//! An attempt that pushes an identity over the ceiling blocks it for the
//! configured duration. That attempt's increment is kept, so the slot it
//! took stays occupied until an explicit `release`.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Longest accepted block; keeps `now + block_duration` representable.
pub const MAX_BLOCK_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Default, Clone)]
struct ConnectionState {
    active_count: usize,
    blocked_until: Option<Instant>,
}

impl ConnectionState {
    fn is_idle(&self, now: Instant) -> bool {
        self.active_count == 0 && self.blocked_until.is_none_or(|until| now >= until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TrackerStats {
    pub tracked_identities: usize,
    pub blocked_identities: usize,
    pub active_units: usize,
}

pub struct ConnectionTracker {
    states: DashMap<String, ConnectionState>,
    max_concurrent: usize,
    block_duration: Duration,
}

impl ConnectionTracker {
    pub fn new(max_concurrent: usize, block_duration: Duration) -> Result<Self, ConfigError> {
        if max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if block_duration.is_zero() {
            return Err(ConfigError::ZeroBlockDuration);
        }
        if block_duration > MAX_BLOCK_DURATION {
            return Err(ConfigError::BlockDurationTooLong(block_duration, MAX_BLOCK_DURATION));
        }
        Ok(Self {
            states: DashMap::new(),
            max_concurrent,
            block_duration,
        })
    }

    pub fn try_admit(&self, identity: &str) -> bool {
        self.try_admit_at(identity, Instant::now())
    }

    /// Check-and-increment for one identity. The whole sequence runs under
    /// the entry's shard lock.
    pub fn try_admit_at(&self, identity: &str, now: Instant) -> bool {
        let mut state = self.states.entry(identity.to_string()).or_default();

        if let Some(until) = state.blocked_until {
            if now < until {
                return false;
            }
            // block expired, decide fresh
            state.blocked_until = None;
        }

        state.active_count += 1;

        if state.active_count > self.max_concurrent {
            let until = now.checked_add(self.block_duration).unwrap_or_else(|| {
                warn!(identity = %identity, "block end not representable, blocking for the maximum");
                now.checked_add(MAX_BLOCK_DURATION).unwrap_or(now)
            });
            state.blocked_until = Some(until);
            warn!(
                identity = %identity,
                active = state.active_count,
                max = self.max_concurrent,
                block_secs = self.block_duration.as_secs_f64(),
                "connection ceiling exceeded, identity blocked"
            );
            return false;
        }

        true
    }

    /// Only call for attempts that were admitted. No-op at zero.
    pub fn release(&self, identity: &str) {
        if let Some(mut state) = self.states.get_mut(identity) {
            state.active_count = state.active_count.saturating_sub(1);
        }
    }

    /// Admits `identity` and returns a guard that releases it on drop.
    pub fn acquire(self: &Arc<Self>, identity: &str) -> Option<ConnectionGuard> {
        if self.try_admit(identity) {
            Some(ConnectionGuard {
                tracker: Arc::clone(self),
                identity: identity.to_string(),
            })
        } else {
            None
        }
    }

    pub fn active_count(&self, identity: &str) -> usize {
        self.states
            .get(identity)
            .map(|s| s.active_count)
            .unwrap_or(0)
    }

    pub fn blocked_until(&self, identity: &str) -> Option<Instant> {
        self.states.get(identity).and_then(|s| s.blocked_until)
    }

    pub fn is_blocked(&self, identity: &str) -> bool {
        self.blocked_until(identity)
            .is_some_and(|until| Instant::now() < until)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }

    pub fn stats(&self) -> TrackerStats {
        let now = Instant::now();
        let mut stats = TrackerStats {
            tracked_identities: 0,
            blocked_identities: 0,
            active_units: 0,
        };
        for entry in self.states.iter() {
            stats.tracked_identities += 1;
            stats.active_units += entry.active_count;
            if entry.blocked_until.is_some_and(|until| now < until) {
                stats.blocked_identities += 1;
            }
        }
        stats
    }

    /// Removes identities with nothing in flight and no live block.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.states.len();
        self.states.retain(|_, state| !state.is_idle(now));
        let removed = before.saturating_sub(self.states.len());
        if removed > 0 {
            debug!(removed, "evicted idle connection tracker entries");
        }
        removed
    }
}

// Holds one admitted unit for an identity until dropped
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
    identity: String,
}

impl ConnectionGuard {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.release(&self.identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn tracker(max: usize, block: Duration) -> ConnectionTracker {
        ConnectionTracker::new(max, block).unwrap()
    }

    #[test]
    fn rejects_zero_limits() {
        assert_eq!(
            ConnectionTracker::new(0, Duration::from_secs(1)).err(),
            Some(ConfigError::ZeroConcurrency)
        );
        assert_eq!(
            ConnectionTracker::new(1, Duration::ZERO).err(),
            Some(ConfigError::ZeroBlockDuration)
        );
    }

    #[test]
    fn rejects_unrepresentable_block_duration() {
        assert!(matches!(
            ConnectionTracker::new(1, Duration::from_secs(u64::MAX)),
            Err(ConfigError::BlockDurationTooLong(_, _))
        ));

        // the longest accepted block still denies without panicking
        let t = tracker(1, MAX_BLOCK_DURATION);
        assert!(t.try_admit("a"));
        assert!(!t.try_admit("a"));
        assert!(t.is_blocked("a"));
    }

    #[test]
    fn admits_and_releases_back_to_zero() {
        let t = tracker(10, Duration::from_secs(300));

        assert!(t.try_admit("127.0.0.1"));
        t.release("127.0.0.1");
        assert!(t.try_admit("127.0.0.1"));
        t.release("127.0.0.1");

        assert_eq!(t.active_count("127.0.0.1"), 0);
        assert!(!t.is_blocked("127.0.0.1"));
    }

    #[test]
    fn release_never_goes_negative() {
        let t = tracker(2, Duration::from_secs(1));
        t.release("nobody");
        t.try_admit("a");
        t.release("a");
        t.release("a");
        assert_eq!(t.active_count("a"), 0);
        assert_eq!(t.active_count("nobody"), 0);
    }

    #[test]
    fn over_ceiling_blocks_for_exactly_block_duration() {
        let block = Duration::from_secs(300);
        let t = tracker(3, block);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(t.try_admit_at("10.0.0.9", now));
        }
        assert!(!t.try_admit_at("10.0.0.9", now));
        assert_eq!(t.blocked_until("10.0.0.9"), Some(now + block));

        // the over-limit increment stays counted
        assert_eq!(t.active_count("10.0.0.9"), 4);
    }

    #[test]
    fn blocked_identity_is_denied_without_state_change() {
        let t = tracker(1, Duration::from_secs(60));
        let now = Instant::now();
        t.try_admit_at("x", now);
        t.try_admit_at("x", now);
        t.release("x");
        t.release("x");

        let later = now + Duration::from_secs(30);
        assert!(!t.try_admit_at("x", later));
        assert_eq!(t.active_count("x"), 0);
        assert_eq!(t.blocked_until("x"), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn expired_block_is_cleared_and_evaluated_fresh() {
        let t = tracker(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(t.try_admit_at("x", now));
        assert!(!t.try_admit_at("x", now));
        t.release("x");
        t.release("x");

        let after = now + Duration::from_secs(60);
        assert!(t.try_admit_at("x", after));
        assert_eq!(t.blocked_until("x"), None);
        assert_eq!(t.active_count("x"), 1);
    }

    #[test]
    fn identities_do_not_interfere() {
        let t = tracker(1, Duration::from_secs(60));
        assert!(t.try_admit("a"));
        assert!(!t.try_admit("a"));
        assert!(t.try_admit("b"));
        assert!(!t.is_blocked("b"));
        assert_eq!(t.active_count("b"), 1);
    }

    #[test]
    fn hammered_identity_leaves_neighbour_untouched() {
        let t = Arc::new(tracker(4, Duration::from_secs(300)));

        // noisy never releases, so it crosses the ceiling
        let noisy: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&t);
                thread::spawn(move || {
                    for _ in 0..50 {
                        t.try_admit("noisy");
                    }
                })
            })
            .collect();
        let quiet: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&t);
                thread::spawn(move || {
                    for _ in 0..50 {
                        assert!(t.try_admit("quiet"));
                        t.release("quiet");
                    }
                })
            })
            .collect();

        for handle in noisy {
            handle.join().unwrap();
        }
        for handle in quiet {
            handle.join().unwrap();
        }

        assert!(t.is_blocked("noisy"));
        assert!(!t.is_blocked("quiet"));
        assert_eq!(t.active_count("quiet"), 0);
    }

    #[test]
    fn concurrent_admits_respect_ceiling() {
        let t = Arc::new(tracker(10, Duration::from_secs(300)));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let t = Arc::clone(&t);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    if t.try_admit("203.0.113.7") {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let admitted = admitted.load(Ordering::SeqCst);
        assert!(admitted <= 10);
        assert!(admitted < 20);
        assert!(t.is_blocked("203.0.113.7"));

        for _ in 0..admitted {
            t.release("203.0.113.7");
        }
        // only the blocking attempt's increment remains
        assert_eq!(t.active_count("203.0.113.7"), 1);
    }

    #[test]
    fn guard_releases_on_drop_and_unwind() {
        let t = Arc::new(tracker(5, Duration::from_secs(60)));

        {
            let guard = t.acquire("g").unwrap();
            assert_eq!(guard.identity(), "g");
            assert_eq!(t.active_count("g"), 1);
        }
        assert_eq!(t.active_count("g"), 0);

        let t2 = Arc::clone(&t);
        let result = thread::spawn(move || {
            let _guard = t2.acquire("g").unwrap();
            panic!("handler blew up");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(t.active_count("g"), 0);
    }

    #[test]
    fn denied_acquire_returns_no_guard() {
        let t = Arc::new(tracker(1, Duration::from_secs(60)));
        let _held = t.acquire("d").unwrap();
        assert!(t.acquire("d").is_none());
        assert!(t.is_blocked("d"));
    }

    #[test]
    fn sweep_keeps_busy_and_blocked_entries() {
        let t = tracker(1, Duration::from_secs(60));
        let now = Instant::now();
        t.try_admit_at("idle", now);
        t.release("idle");
        t.try_admit_at("busy", now);
        t.try_admit_at("blocked", now);
        t.try_admit_at("blocked", now);
        t.release("blocked");
        t.release("blocked");

        assert_eq!(t.sweep_at(now), 1);
        assert_eq!(t.stats().tracked_identities, 2);

        // once the block lapses the drained entry goes too
        assert_eq!(t.sweep_at(now + Duration::from_secs(61)), 1);
    }

    #[test]
    fn stats_summarise_state() {
        let t = tracker(1, Duration::from_secs(60));
        t.try_admit("a");
        t.try_admit("b");
        t.try_admit("b");

        let stats = t.stats();
        assert_eq!(stats.tracked_identities, 2);
        assert_eq!(stats.blocked_identities, 1);
        assert_eq!(stats.active_units, 3);
    }
}
