//! Passive lease expiry for stores without a native TTL.
//!
//! The reaper deletes leases whose expiry has passed. Counting never depends
//! on it: the counter filters expired leases at read time, so a lagging or
//! stopped reaper only leaves dead records behind.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CapacityDomain;
use crate::error::StoreError;
use crate::ledger::{DeleteOutcome, LeaseLedger};
use crate::metrics::LeaseMetrics;
use crate::model::PageQuery;
use crate::store::LeaseStore;

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    /// Records examined.
    pub scanned: usize,
    /// Expired records deleted by this sweep.
    pub reaped: usize,
}

/// Periodic sweeper deleting expired leases of one domain.
pub struct LeaseReaper {
    store: Arc<dyn LeaseStore>,
    domain: CapacityDomain,
    interval: Duration,
    metrics: LeaseMetrics,
}

impl LeaseReaper {
    pub fn new(store: Arc<dyn LeaseStore>, domain: CapacityDomain, interval: Duration) -> Self {
        Self {
            store,
            domain,
            interval,
            metrics: LeaseMetrics::new(),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: LeaseMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sweep once using the current time.
    pub async fn sweep(&self) -> Result<ReapReport, StoreError> {
        self.sweep_at(Utc::now().timestamp()).await
    }

    /// Delete every lease with `expires_at <= now`.
    ///
    /// The partition is listed completely before anything is deleted, so
    /// continuation keys stay valid for the whole scan.
    pub async fn sweep_at(&self, now: i64) -> Result<ReapReport, StoreError> {
        let mut report = ReapReport::default();
        let mut expired = Vec::new();
        let mut start_key = None;

        loop {
            let page = self
                .store
                .query_page(&self.domain, PageQuery::all().starting_after(start_key))
                .await?;

            report.scanned += page.items.len();
            expired.extend(
                page.items
                    .into_iter()
                    .filter(|item| !item.is_live_at(now))
                    .map(|item| item.lease_id),
            );

            match page.last_evaluated_key {
                Some(key) => start_key = Some(key),
                None => break,
            }
        }

        let ledger = LeaseLedger::new(self.store.as_ref(), &self.domain);
        for lease_id in expired {
            match ledger.delete(&lease_id).await? {
                DeleteOutcome::Deleted => {
                    debug!(lease_id = %lease_id, "Reaped expired lease");
                    report.reaped += 1;
                }
                DeleteOutcome::NotFound => {
                    debug!(lease_id = %lease_id, "Expired lease already gone");
                }
            }
        }

        if report.reaped > 0 {
            self.metrics
                .leases_reaped
                .add(u64::try_from(report.reaped).unwrap_or(u64::MAX), &[]);
            info!(
                domain = %self.domain,
                scanned = report.scanned,
                reaped = report.reaped,
                "Reaped expired leases"
            );
        }

        Ok(report)
    }

    /// Sweep on a fixed interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            domain = %self.domain,
            interval_secs = self.interval.as_secs(),
            "Lease reaper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Lease reaper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        match e {
                            StoreError::Transport { .. } => {
                                warn!(error = %e, "Lease sweep failed, retrying next tick");
                            }
                            _ => error!(error = %e, "Lease sweep failed"),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LeaseRecord;
    use crate::store::MemoryLeaseStore;

    fn domain() -> CapacityDomain {
        CapacityDomain::new("PK", "CONCURRENCY_LEASES", "SK")
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired_leases() {
        let store = Arc::new(MemoryLeaseStore::with_page_size(2));
        let domain = domain();
        store.insert(&domain, LeaseRecord::active("lease-a", None, 0, 10)).await;
        store.insert(&domain, LeaseRecord::active("lease-b", None, 0, 100)).await;
        store.insert(&domain, LeaseRecord::active("lease-c", None, 0, 50)).await;

        let reaper = LeaseReaper::new(store.clone(), domain.clone(), Duration::from_secs(30));
        let report = reaper.sweep_at(50).await.unwrap();

        assert_eq!(report, ReapReport { scanned: 3, reaped: 2 });
        assert!(store.get(&domain, "lease-b").await.is_some());
        assert_eq!(store.len(&domain).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let store = Arc::new(MemoryLeaseStore::new());
        let domain = domain();
        store.insert(&domain, LeaseRecord::active("lease-old", None, 0, 1)).await;

        let cancel = CancellationToken::new();
        let reaper = LeaseReaper::new(store.clone(), domain.clone(), Duration::from_secs(30));
        let handle = tokio::spawn(reaper.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(store.is_empty(&domain).await);
    }
}
