//! # Admission Policy
//!
//! Combines the [`AdmissionCounter`] and the [`LeaseLedger`] into the acquire
//! and release procedures.
//!
//! Acquire runs in two independent stages: count live leases, then
//! conditionally create a new one. The pair is not linearizable. Two requests
//! racing for the last slot can both observe `count < ceiling` and both create
//! a lease, so the live count may momentarily exceed the ceiling by the number
//! of concurrent racers. The ceiling is advisory at decision time; the store's
//! conditional write is the only hard gate, and it guards lease id uniqueness.
//! No lock or coordinator is taken to close this window.
//!
//! When the create loses a race, the reported `current_running` is the count
//! from the first stage. It may be stale by the time the caller retries; the
//! count is not re-queried.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::LeaseConfig;
use crate::counter::AdmissionCounter;
use crate::error::{LeaseError, StoreError};
use crate::ledger::{CreateOutcome, DeleteOutcome, LeaseLedger};
use crate::metrics::LeaseMetrics;
use crate::model::LeaseRecord;
use crate::store::LeaseStore;

/// Terminal result of a successful acquire evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { lease_id: String, expires_at: i64 },
    /// Capacity is exhausted or a concurrent request won the last slot.
    Wait { current_running: u32 },
}

/// Terminal result of a successful release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The lease was already released or has expired.
    AlreadyGone,
}

/// Generate a fresh lease id.
#[must_use]
pub fn new_lease_id() -> String {
    format!("lease-{}", Uuid::new_v4())
}

/// Stateless admission policy over a shared store and configuration.
#[derive(Clone)]
pub struct LeaseManager {
    config: Arc<LeaseConfig>,
    store: Arc<dyn LeaseStore>,
    metrics: LeaseMetrics,
}

impl LeaseManager {
    pub fn new(config: Arc<LeaseConfig>, store: Arc<dyn LeaseStore>) -> Self {
        Self {
            config,
            store,
            metrics: LeaseMetrics::new(),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: LeaseMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn LeaseStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn metrics(&self) -> &LeaseMetrics {
        &self.metrics
    }

    /// Try to acquire a lease now.
    pub async fn acquire(&self, reference_id: Option<String>) -> Result<AcquireOutcome, LeaseError> {
        self.acquire_at(reference_id, Utc::now().timestamp()).await
    }

    /// Try to acquire a lease, evaluating expiry against `now`.
    #[instrument(skip(self), fields(domain = %self.config.domain))]
    pub async fn acquire_at(
        &self,
        reference_id: Option<String>,
        now: i64,
    ) -> Result<AcquireOutcome, LeaseError> {
        let domain = &self.config.domain;
        let ceiling = self.config.max_concurrent;

        let live = AdmissionCounter::new(self.store.as_ref(), domain, ceiling)
            .count_live(now)
            .await
            .map_err(|e| {
                let err = counting_error(e);
                error!(error = %err, reason = %err.reason(), "Failed to query active leases");
                self.metrics.record_acquire_failure(err.reason().as_str());
                err
            })?;

        if live.ceiling_reached {
            info!(
                current_running = live.count,
                max_concurrent = ceiling,
                "Lease capacity reached"
            );
            self.metrics.lease_waits.add(1, &[]);
            return Ok(AcquireOutcome::Wait {
                current_running: live.count,
            });
        }

        let lease_id = new_lease_id();
        let record = LeaseRecord::active(lease_id.clone(), reference_id, now, self.config.ttl_seconds);

        match LeaseLedger::new(self.store.as_ref(), domain).create(&record).await {
            Ok(CreateOutcome::Created) => {
                info!(lease_id = %lease_id, expires_at = record.expires_at, "Lease acquired");
                self.metrics.leases_acquired.add(1, &[]);
                Ok(AcquireOutcome::Acquired {
                    lease_id,
                    expires_at: record.expires_at,
                })
            }
            Ok(CreateOutcome::Conflict) => {
                warn!(lease_id = %lease_id, "Lease conflict, retry later");
                self.metrics.lease_waits.add(1, &[]);
                Ok(AcquireOutcome::Wait {
                    current_running: live.count,
                })
            }
            Err(e) => {
                let err = LeaseError::Store(e);
                error!(lease_id = %lease_id, error = %err, reason = %err.reason(), "Failed to create lease");
                self.metrics.record_acquire_failure(err.reason().as_str());
                Err(err)
            }
        }
    }

    /// Release a lease. Releasing a missing lease succeeds.
    #[instrument(skip(self), fields(domain = %self.config.domain))]
    pub async fn release(&self, lease_id: &str) -> Result<ReleaseOutcome, LeaseError> {
        if lease_id.is_empty() {
            return Err(LeaseError::MissingLeaseId);
        }

        match LeaseLedger::new(self.store.as_ref(), &self.config.domain)
            .delete(lease_id)
            .await
        {
            Ok(DeleteOutcome::Deleted) => {
                info!(lease_id = %lease_id, "Lease released");
                self.metrics.leases_released.add(1, &[]);
                Ok(ReleaseOutcome::Released)
            }
            Ok(DeleteOutcome::NotFound) => {
                warn!(lease_id = %lease_id, "Lease not found during release");
                Ok(ReleaseOutcome::AlreadyGone)
            }
            Err(e) => {
                let err = LeaseError::Store(e);
                error!(lease_id = %lease_id, error = %err, reason = %err.reason(), "Failed to release lease");
                self.metrics.record_release_failure(err.reason().as_str());
                Err(err)
            }
        }
    }
}

/// Classify a counting failure: communication failures become `QueryFailed`,
/// unclassified ones stay `unexpected`.
fn counting_error(err: StoreError) -> LeaseError {
    match err {
        StoreError::Unexpected(_) => LeaseError::Store(err),
        other => LeaseError::QueryFailed(other),
    }
}
