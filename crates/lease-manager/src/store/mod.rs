//! Store contract required by the admission core.
//!
//! The core never implements storage itself. A backing store must offer:
//!
//! - a strongly consistent partition query with continuation-token pagination
//! - a conditional put that fails when the `(partition, lease_id)` key exists
//! - a conditional delete that fails when no such item exists in the partition
//!
//! Passive expiry is the store's concern (native TTL) or the
//! [`LeaseReaper`](crate::reaper::LeaseReaper)'s, never the counter's.

pub mod kubernetes;
pub mod memory;

use async_trait::async_trait;

use crate::config::CapacityDomain;
use crate::error::StoreError;
use crate::model::{LeasePage, LeaseRecord, PageQuery};

pub use self::kubernetes::KubeLeaseStore;
pub use self::memory::MemoryLeaseStore;

/// Backing store for lease records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read one page of the domain partition using a consistent read.
    async fn query_page(
        &self,
        domain: &CapacityDomain,
        query: PageQuery,
    ) -> Result<LeasePage, StoreError>;

    /// Create `record`, failing with [`StoreError::ConditionFailed`] when its key exists.
    async fn put_if_absent(
        &self,
        domain: &CapacityDomain,
        record: &LeaseRecord,
    ) -> Result<(), StoreError>;

    /// Delete a lease, failing with [`StoreError::ConditionFailed`] when it is absent.
    async fn delete_if_present(
        &self,
        domain: &CapacityDomain,
        lease_id: &str,
    ) -> Result<(), StoreError>;
}
