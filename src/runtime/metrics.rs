//! Job-level counters for the write coordinator.
//!
//! Counters are thread-safe and monotonically increasing; `items_so_far`
//! only advances when a batch's success hook fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct JobMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    success_batches: AtomicU64,
    success_events: AtomicU64,
    failure_batches: AtomicU64,
    failure_events: AtomicU64,
}

impl JobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful batch and returns the new cumulative item count.
    pub(crate) fn record_success(&self, items: u64) -> u64 {
        self.inner.success_batches.fetch_add(1, Ordering::Relaxed);
        self.inner.success_events.fetch_add(items, Ordering::AcqRel) + items
    }

    pub(crate) fn record_failure(&self, items: u64) {
        self.inner.failure_batches.fetch_add(1, Ordering::Relaxed);
        self.inner.failure_events.fetch_add(items, Ordering::Relaxed);
    }

    pub(crate) fn items_so_far(&self) -> u64 {
        self.inner.success_events.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> JobReport {
        JobReport {
            success_batches: self.inner.success_batches.load(Ordering::Relaxed),
            success_events: self.inner.success_events.load(Ordering::Acquire),
            failure_batches: self.inner.failure_batches.load(Ordering::Relaxed),
            failure_events: self.inner.failure_events.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the job counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub success_batches: u64,
    pub success_events: u64,
    pub failure_batches: u64,
    pub failure_events: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metrics_report_zero() {
        let metrics = JobMetrics::new();
        let report = metrics.snapshot();

        assert_eq!(report.success_batches, 0);
        assert_eq!(report.success_events, 0);
        assert_eq!(report.failure_batches, 0);
        assert_eq!(report.failure_events, 0);
    }

    #[test]
    fn success_advances_items() {
        let metrics = JobMetrics::new();

        assert_eq!(metrics.record_success(3), 3);
        assert_eq!(metrics.record_success(2), 5);
        assert_eq!(metrics.items_so_far(), 5);

        let report = metrics.snapshot();
        assert_eq!(report.success_batches, 2);
        assert_eq!(report.success_events, 5);
    }

    #[test]
    fn failure_does_not_advance_items() {
        let metrics = JobMetrics::new();
        metrics.record_failure(4);

        assert_eq!(metrics.items_so_far(), 0);
        let report = metrics.snapshot();
        assert_eq!(report.failure_batches, 1);
        assert_eq!(report.failure_events, 4);
    }
}
