//! Running dispatch counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::dispatch::DispatchStatus;

/// Process-wide issued/succeeded/failed counters.
///
/// Updates are lock-free, so concurrent dispatches never wait on each
/// other or on a reader taking a snapshot.
#[derive(Debug)]
pub struct StatsAggregator {
    issued: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    started: Instant,
}

impl StatsAggregator {
    /// Creates zeroed counters; elapsed time is measured from now.
    pub fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_issued(&self) {
        self.issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, status: DispatchStatus) {
        let counter = match status {
            DispatchStatus::Success => &self.succeeded,
            DispatchStatus::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            issued: self.issued.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub issued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    /// Dispatches that reached a terminal outcome.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Succeeded as a percentage of issued (0 when nothing was issued).
    pub fn success_rate(&self) -> f64 {
        percentage(self.succeeded, self.issued)
    }

    pub fn failure_rate(&self) -> f64 {
        percentage(self.failed, self.issued)
    }

    /// Issued events per second of elapsed time.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.issued as f64 / secs
        } else {
            0.0
        }
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    part as f64 / total.max(1) as f64 * 100.0
}
