use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time view of a handler, for operational tooling.
///
/// Gauges are read without a common lock, so a snapshot taken while
/// messages are moving may be off by one between fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerStats {
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub queued: usize,
    pub queue_capacity: usize,
    pub active_leases: usize,

    pub admitted: u64,
    pub duplicates: u64,
    pub processed: u64,
    pub failed: u64,
    pub fatal: u64,
    /// Worker failures the strategy propagated (message left unacknowledged).
    pub rejected: u64,
    pub aborted: u64,
    pub ack_failures: u64,
    pub lease_failures: u64,
}

/// Monotonic counters shared by the handler, its tasks and lease extenders.
#[derive(Debug, Default)]
pub struct HandlerCounters {
    admitted: AtomicU64,
    duplicates: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    fatal: AtomicU64,
    rejected: AtomicU64,
    aborted: AtomicU64,
    ack_failures: AtomicU64,
    lease_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Admitted,
    Duplicate,
    Processed,
    Failed,
    Fatal,
    Rejected,
    Aborted,
    AckFailure,
    LeaseFailure,
}

impl HandlerCounters {
    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Admitted => &self.admitted,
            Counter::Duplicate => &self.duplicates,
            Counter::Processed => &self.processed,
            Counter::Failed => &self.failed,
            Counter::Fatal => &self.fatal,
            Counter::Rejected => &self.rejected,
            Counter::Aborted => &self.aborted,
            Counter::AckFailure => &self.ack_failures,
            Counter::LeaseFailure => &self.lease_failures,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.slot(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    /// Copy the counters into `stats`, leaving the gauges alone.
    pub fn fill(&self, stats: &mut HandlerStats) {
        stats.admitted = self.get(Counter::Admitted);
        stats.duplicates = self.get(Counter::Duplicate);
        stats.processed = self.get(Counter::Processed);
        stats.failed = self.get(Counter::Failed);
        stats.fatal = self.get(Counter::Fatal);
        stats.rejected = self.get(Counter::Rejected);
        stats.aborted = self.get(Counter::Aborted);
        stats.ack_failures = self.get(Counter::AckFailure);
        stats.lease_failures = self.get(Counter::LeaseFailure);
    }
}
