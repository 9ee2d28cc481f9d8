//! OpenTelemetry counters for lease events.
//!
//! Instruments come from the global meter provider; without an installed SDK
//! they are no-ops.

use opentelemetry::{global, metrics::Counter, KeyValue};

/// Meter name shared by every lease instrument.
pub const METER_NAME: &str = "concurrency_lease_manager";

/// Counters for admission, release, reclamation and request-boundary failures.
#[derive(Debug, Clone)]
pub struct LeaseMetrics {
    pub lease_waits: Counter<u64>,
    pub leases_acquired: Counter<u64>,
    pub lease_acquire_failures: Counter<u64>,
    pub leases_released: Counter<u64>,
    pub lease_release_failures: Counter<u64>,
    pub unhandled_exceptions: Counter<u64>,
    pub leases_reaped: Counter<u64>,
}

impl LeaseMetrics {
    #[must_use]
    pub fn new() -> Self {
        let meter = global::meter(METER_NAME);

        Self {
            lease_waits: meter
                .u64_counter("lease_waits")
                .with_description("Acquire requests told to wait")
                .build(),
            leases_acquired: meter
                .u64_counter("leases_acquired")
                .with_description("Leases granted")
                .build(),
            lease_acquire_failures: meter
                .u64_counter("lease_acquire_failures")
                .with_description("Acquire requests that ended in an error")
                .build(),
            leases_released: meter
                .u64_counter("leases_released")
                .with_description("Leases explicitly released")
                .build(),
            lease_release_failures: meter
                .u64_counter("lease_release_failures")
                .with_description("Release requests that ended in an error")
                .build(),
            unhandled_exceptions: meter
                .u64_counter("unhandled_exceptions")
                .with_description("Requests that panicked inside the dispatcher")
                .build(),
            leases_reaped: meter
                .u64_counter("leases_reaped")
                .with_description("Expired leases deleted by the reaper")
                .build(),
        }
    }

    /// Count an acquire failure labelled with its wire reason.
    pub fn record_acquire_failure(&self, reason: &'static str) {
        self.lease_acquire_failures
            .add(1, &[KeyValue::new("reason", reason)]);
    }

    /// Count a release failure labelled with its wire reason.
    pub fn record_release_failure(&self, reason: &'static str) {
        self.lease_release_failures
            .add(1, &[KeyValue::new("reason", reason)]);
    }
}

impl Default for LeaseMetrics {
    fn default() -> Self {
        Self::new()
    }
}
