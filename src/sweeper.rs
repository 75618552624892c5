use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tracing::info;

use crate::admission::Admission;
use crate::config::SweepConfig;

/// One eviction pass over both maps. Returns (tracker entries, buckets) removed.
pub fn sweep_once(admission: &Admission, idle_ttl: Duration) -> (usize, usize) {
    let connections = admission.tracker.sweep();
    let buckets = admission.limiter.sweep_idle(idle_ttl);
    admission.refresh_gauges();
    (connections, buckets)
}

// Periodic idle eviction, only started when configured
pub fn spawn_sweeper(admission: Admission, config: SweepConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(config.interval);

        info!(
            interval_secs = config.interval.as_secs(),
            idle_ttl_secs = config.idle_ttl.as_secs(),
            "idle sweeper started"
        );

        loop {
            ticker.tick().await;

            let (connections, buckets) = sweep_once(&admission, config.idle_ttl);
            if connections + buckets > 0 {
                info!(connections, buckets, "swept idle identities");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::audit_channel;
    use crate::config::AdmissionConfig;

    #[test]
    fn sweep_once_drops_released_identities() {
        let (audit, _rx) = audit_channel(4);
        let admission = Admission::new(&AdmissionConfig::with_rate(100.0, 10), audit).unwrap();

        admission.tracker.try_admit("198.51.100.1");
        admission.tracker.release("198.51.100.1");
        admission.tracker.try_admit("198.51.100.2");
        admission.limiter.allow("198.51.100.1");

        let (connections, buckets) = sweep_once(&admission, Duration::from_secs(600));
        assert_eq!(connections, 1);
        assert_eq!(buckets, 0);
        assert_eq!(admission.tracker.active_count("198.51.100.2"), 1);
    }

    #[tokio::test]
    async fn spawned_sweeper_evicts_on_its_interval() {
        let (audit, _rx) = audit_channel(4);
        let admission = Admission::new(&AdmissionConfig::with_rate(100.0, 10), audit).unwrap();
        admission.tracker.try_admit("198.51.100.3");
        admission.tracker.release("198.51.100.3");
        admission.limiter.allow("198.51.100.3");

        let handle = spawn_sweeper(
            admission.clone(),
            SweepConfig {
                interval: Duration::from_millis(10),
                idle_ttl: Duration::from_millis(20),
            },
        );

        let mut evicted = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if admission.tracker.stats().tracked_identities == 0 && admission.limiter.tracked() == 0 {
                evicted = true;
                break;
            }
        }
        handle.abort();
        assert!(evicted);
    }
}
