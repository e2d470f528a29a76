use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Dispatch counters. One instance is shared by the engine and the
/// notification dispatcher of a deployment.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    pub assignments: AtomicU64,
    pub offers: AtomicU64,
    pub claim_conflicts: AtomicU64,
    pub declines: AtomicU64,
    pub no_eligible_agent: AtomicU64,
    pub validation_failures: AtomicU64,
    pub notification_failures: AtomicU64,
    pub store_timeouts: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_assignment(&self) {
        self.assignments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offer(&self) {
        self.offers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim_conflict(&self) {
        self.claim_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decline(&self) {
        self.declines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_eligible_agent(&self) {
        self.no_eligible_agent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failure(&self) {
        self.notification_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_timeout(&self) {
        self.store_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> DispatchStats {
        DispatchStats {
            assignments: self.assignments.load(Ordering::Relaxed),
            offers: self.offers.load(Ordering::Relaxed),
            claim_conflicts: self.claim_conflicts.load(Ordering::Relaxed),
            declines: self.declines.load(Ordering::Relaxed),
            no_eligible_agent: self.no_eligible_agent.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            store_timeouts: self.store_timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            assignments = stats.assignments,
            offers = stats.offers,
            claim_conflicts = stats.claim_conflicts,
            declines = stats.declines,
            no_eligible_agent = stats.no_eligible_agent,
            validation_failures = stats.validation_failures,
            notification_failures = stats.notification_failures,
            store_timeouts = stats.store_timeouts,
            "Dispatch metrics"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub assignments: u64,
    pub offers: u64,
    pub claim_conflicts: u64,
    pub declines: u64,
    pub no_eligible_agent: u64,
    pub validation_failures: u64,
    pub notification_failures: u64,
    pub store_timeouts: u64,
}

/// Logs the elapsed time of an operation when finished or dropped
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
    finished: bool,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
            finished: false,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }

    pub fn finish(mut self) {
        self.finished = true;
        info!(
            operation = self.operation,
            duration_ms = self.elapsed_ms(),
            "Operation completed"
        );
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                operation = self.operation,
                duration_ms = self.elapsed_ms(),
                "Operation ended early"
            );
        }
    }
}

#[macro_export]
macro_rules! time_operation {
    ($operation:expr) => {
        let _timer = $crate::observability::OperationTimer::new($operation);
    };
}
