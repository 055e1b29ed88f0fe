//! Client statistics counters.
//!
//! All counters are `AtomicU64` updated with `Ordering::Relaxed`. Each
//! counter is independent and monotonically increasing; `Relaxed`
//! guarantees no torn updates, which is all telemetry needs. A
//! [`snapshot`](Statistics::snapshot) reads the counters sequentially,
//! so two counters may be momentarily inconsistent relative to each
//! other, which is acceptable for dashboards and the price of keeping
//! the hot path free of barriers and locks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters maintained by the client.
#[derive(Debug, Default)]
pub(crate) struct Statistics {
    /// Check calls received from callers.
    pub total_called_checks: AtomicU64,
    /// Check requests sent by cache flushes and evictions.
    pub send_checks_by_flush: AtomicU64,
    /// Check requests sent to the backend during caller Check calls.
    pub send_checks_in_flight: AtomicU64,
    /// Report calls received from callers.
    pub total_called_reports: AtomicU64,
    /// Report requests sent by cache flushes and evictions.
    pub send_reports_by_flush: AtomicU64,
    /// Report requests sent to the backend during caller Report calls.
    pub send_reports_in_flight: AtomicU64,
    /// Operations carried by all report requests sent to the backend.
    pub send_report_operations: AtomicU64,
}

impl Statistics {
    /// Increments a counter by one.
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `n` to a counter.
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Reads all counters, lock-free.
    pub(crate) fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            total_called_checks: self.total_called_checks.load(Ordering::Relaxed),
            send_checks_by_flush: self.send_checks_by_flush.load(Ordering::Relaxed),
            send_checks_in_flight: self.send_checks_in_flight.load(Ordering::Relaxed),
            total_called_reports: self.total_called_reports.load(Ordering::Relaxed),
            send_reports_by_flush: self.send_reports_by_flush.load(Ordering::Relaxed),
            send_reports_in_flight: self.send_reports_in_flight.load(Ordering::Relaxed),
            send_report_operations: self.send_report_operations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the client counters.
///
/// `send_report_operations / total_called_reports` approximates the
/// report aggregation ratio: each caller report carries its own
/// operations, but an outbound request may carry up to 100 merged ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    /// Check calls received from callers.
    pub total_called_checks: u64,
    /// Check requests sent by cache flushes and evictions.
    pub send_checks_by_flush: u64,
    /// Check requests sent to the backend during caller Check calls.
    pub send_checks_in_flight: u64,
    /// Report calls received from callers.
    pub total_called_reports: u64,
    /// Report requests sent by cache flushes and evictions.
    pub send_reports_by_flush: u64,
    /// Report requests sent to the backend during caller Report calls.
    pub send_reports_in_flight: u64,
    /// Operations carried by all report requests sent to the backend.
    pub send_report_operations: u64,
}
