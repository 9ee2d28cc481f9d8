//! Admission counter.
//!
//! Counts live leases in a capacity domain by paging through its partition
//! with consistent reads. Counting stops as soon as the running total reaches
//! the ceiling, which bounds the number of pages read under contention.
//!
//! Expiry is tested at read time only (`expires_at > now`). The filter is
//! applied again client-side so a store that ignores it, or whose reclamation
//! lags behind nominal expiry, still yields a correct live count.

use tracing::debug;

use crate::config::CapacityDomain;
use crate::error::StoreError;
use crate::model::PageQuery;
use crate::store::LeaseStore;

/// Result of a counting pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveCount {
    /// Live leases seen. Exact when the ceiling was not reached, otherwise a
    /// lower bound of at least `ceiling`.
    pub count: u32,
    /// Counting stopped early because `count` reached the ceiling.
    pub ceiling_reached: bool,
    /// Pages read.
    pub pages: u32,
}

/// Counts live leases for one capacity domain.
pub struct AdmissionCounter<'a> {
    store: &'a dyn LeaseStore,
    domain: &'a CapacityDomain,
    ceiling: u32,
}

impl<'a> AdmissionCounter<'a> {
    pub fn new(store: &'a dyn LeaseStore, domain: &'a CapacityDomain, ceiling: u32) -> Self {
        Self {
            store,
            domain,
            ceiling,
        }
    }

    /// Count leases live at `now`.
    ///
    /// Store failures are returned as-is; retrying is the caller's concern.
    pub async fn count_live(&self, now: i64) -> Result<LiveCount, StoreError> {
        let mut count: u32 = 0;
        let mut pages: u32 = 0;
        let mut start_key = None;

        loop {
            let page = self
                .store
                .query_page(self.domain, PageQuery::live_at(now).starting_after(start_key))
                .await?;
            pages += 1;

            let live = page.items.iter().filter(|item| item.is_live_at(now)).count();
            count = count.saturating_add(u32::try_from(live).unwrap_or(u32::MAX));

            if count >= self.ceiling {
                debug!(count, pages, ceiling = self.ceiling, "Lease ceiling reached");
                return Ok(LiveCount {
                    count,
                    ceiling_reached: true,
                    pages,
                });
            }

            match page.last_evaluated_key {
                Some(key) => start_key = Some(key),
                None => break,
            }
        }

        debug!(count, pages, "Counted live leases");
        Ok(LiveCount {
            count,
            ceiling_reached: false,
            pages,
        })
    }
}
