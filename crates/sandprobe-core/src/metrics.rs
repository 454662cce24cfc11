//! Global atomic counters for a harness run.
//!
//! Counters are bumped at the call site. [`Metrics::flush`] emits all of
//! them as one `tracing::info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    probes_executed: AtomicU64,
    transport_faults: AtomicU64,
    timeouts: AtomicU64,
    judge_panics: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            probes_executed: AtomicU64::new(0),
            transport_faults: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            judge_panics: AtomicU64::new(0),
        }
    }

    pub fn inc_probes_executed(&self) {
        self.probes_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "probes_executed", "counter incremented");
    }

    pub fn inc_transport_faults(&self) {
        self.transport_faults.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "transport_faults", "counter incremented");
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timeouts", "counter incremented");
    }

    /// A judge (or probe preparation) panicked and was contained.
    pub fn inc_judge_panics(&self) {
        self.judge_panics.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "judge_panics", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            probes_executed = self.probes_executed(),
            transport_faults = self.transport_faults(),
            timeouts = self.timeouts(),
            judge_panics = self.judge_panics(),
        );
    }

    pub fn probes_executed(&self) -> u64 {
        self.probes_executed.load(Ordering::Relaxed)
    }

    pub fn transport_faults(&self) -> u64 {
        self.transport_faults.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn judge_panics(&self) -> u64 {
        self.judge_panics.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.probes_executed.store(0, Ordering::Relaxed);
        self.transport_faults.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.judge_panics.store(0, Ordering::Relaxed);
    }
}
