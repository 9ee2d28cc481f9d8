//! Lease ledger: the conditional create and delete operations.
//!
//! The store's conditional write is the only true admission gate. A create
//! conflict and a delete of a missing lease are outcomes, not errors.

use tracing::debug;

use crate::config::CapacityDomain;
use crate::error::StoreError;
use crate::model::LeaseRecord;
use crate::store::LeaseStore;

/// Outcome of [`LeaseLedger::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A record with the same key already exists.
    Conflict,
}

/// Outcome of [`LeaseLedger::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Already released or expired.
    NotFound,
}

/// Conditional writes against one capacity domain.
pub struct LeaseLedger<'a> {
    store: &'a dyn LeaseStore,
    domain: &'a CapacityDomain,
}

impl<'a> LeaseLedger<'a> {
    pub fn new(store: &'a dyn LeaseStore, domain: &'a CapacityDomain) -> Self {
        Self { store, domain }
    }

    /// Create `record` unless a lease with the same id exists.
    pub async fn create(&self, record: &LeaseRecord) -> Result<CreateOutcome, StoreError> {
        match self.store.put_if_absent(self.domain, record).await {
            Ok(()) => Ok(CreateOutcome::Created),
            Err(StoreError::ConditionFailed) => {
                debug!(lease_id = %record.lease_id, "Lease create precondition failed");
                Ok(CreateOutcome::Conflict)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a lease, reporting a missing one as [`DeleteOutcome::NotFound`].
    pub async fn delete(&self, lease_id: &str) -> Result<DeleteOutcome, StoreError> {
        match self.store.delete_if_present(self.domain, lease_id).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(StoreError::ConditionFailed) => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e),
        }
    }
}
