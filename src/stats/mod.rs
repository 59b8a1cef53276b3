//! Lock-free run statistics using atomic operations
//!
//! Counters are shared across concurrently running task units without mutex
//! contention; a snapshot is logged as the batch summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counters for one batch run.
#[derive(Debug)]
pub struct RunStats {
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub skipped: AtomicU64,
    pub crashed: AtomicU64,
    pub proxies_reachable: AtomicU64,
    pub proxies_unreachable: AtomicU64,
    pub start_time: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            crashed: AtomicU64::new(0),
            proxies_reachable: AtomicU64::new(0),
            proxies_unreachable: AtomicU64::new(0),
            start_time: AtomicU64::new(now),
        }
    }

    /// Record a task that reached the success state.
    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task that reached the failed state.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task skipped because it was already terminal.
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task left pending after an infrastructure error.
    pub fn record_crashed(&self) {
        self.crashed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the probe split from a validator run.
    pub fn record_probes(&self, reachable: u64, unreachable: u64) {
        self.proxies_reachable.fetch_add(reachable, Ordering::Relaxed);
        self.proxies_unreachable.fetch_add(unreachable, Ordering::Relaxed);
    }

    /// Tasks that actually ran to a terminal decision this run.
    pub fn completed(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    /// Seconds since the run started.
    pub fn elapsed_secs(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now.saturating_sub(self.start_time.load(Ordering::Relaxed))
    }

    /// Get snapshot for serialization
    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            crashed: self.crashed.load(Ordering::Relaxed),
            proxies_reachable: self.proxies_reachable.load(Ordering::Relaxed),
            proxies_unreachable: self.proxies_unreachable.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed_secs(),
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of run stats
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub crashed: u64,
    pub proxies_reachable: u64,
    pub proxies_unreachable: u64,
    pub elapsed_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = RunStats::new();
        stats.record_succeeded();
        stats.record_succeeded();
        stats.record_failed();
        stats.record_skipped();
        stats.record_crashed();
        stats.record_probes(7, 3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.succeeded, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.crashed, 1);
        assert_eq!(snapshot.proxies_reachable, 7);
        assert_eq!(snapshot.proxies_unreachable, 3);
        assert_eq!(stats.completed(), 3);
    }
}
