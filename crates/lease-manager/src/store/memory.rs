//! In-process lease store.
//!
//! Used by tests and local development. It honours the same conditional
//! semantics as a real store but has no native expiry: expired records stay
//! until deleted by a release or the reaper.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::LeaseStore;
use crate::config::CapacityDomain;
use crate::error::StoreError;
use crate::model::{LeasePage, LeaseRecord, PageQuery};

/// Default number of raw items examined per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

type ItemKey = (String, String);

/// Lease store held in memory, keyed by `(partition value, lease id)`.
pub struct MemoryLeaseStore {
    items: RwLock<BTreeMap<ItemKey, LeaseRecord>>,
    page_size: usize,
}

impl MemoryLeaseStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create a store returning at most `page_size` raw items per query page.
    ///
    /// The limit is applied before the expiry filter, so a page may come back
    /// empty while still carrying a continuation key.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Write a record directly, skipping the create precondition.
    pub async fn insert(&self, domain: &CapacityDomain, record: LeaseRecord) {
        let key = (domain.hash_value.clone(), record.lease_id.clone());
        self.items.write().await.insert(key, record);
    }

    /// Fetch one record.
    pub async fn get(&self, domain: &CapacityDomain, lease_id: &str) -> Option<LeaseRecord> {
        let key = (domain.hash_value.clone(), lease_id.to_string());
        self.items.read().await.get(&key).cloned()
    }

    /// Number of records in the partition, expired ones included.
    pub async fn len(&self, domain: &CapacityDomain) -> usize {
        self.items
            .read()
            .await
            .keys()
            .filter(|(partition, _)| *partition == domain.hash_value)
            .count()
    }

    pub async fn is_empty(&self, domain: &CapacityDomain) -> bool {
        self.len(domain).await == 0
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn query_page(
        &self,
        domain: &CapacityDomain,
        query: PageQuery,
    ) -> Result<LeasePage, StoreError> {
        let items = self.items.read().await;
        let partition = domain.hash_value.clone();

        let lower = match query.exclusive_start_key {
            Some(start) => Bound::Excluded((partition.clone(), start)),
            None => Bound::Included((partition.clone(), String::new())),
        };

        let mut scanned = items
            .range((lower, Bound::Unbounded))
            .take_while(|((p, _), _)| *p == partition)
            .map(|(_, record)| record);

        let raw: Vec<&LeaseRecord> = scanned.by_ref().take(self.page_size).collect();
        let has_more = scanned.next().is_some();

        let last_evaluated_key = if has_more {
            raw.last().map(|record| record.lease_id.clone())
        } else {
            None
        };

        let page = LeasePage {
            items: raw
                .into_iter()
                .filter(|record| query.live_at.is_none_or(|now| record.is_live_at(now)))
                .map(LeaseRecord::summary)
                .collect(),
            last_evaluated_key,
        };

        debug!(
            domain = %domain,
            returned = page.items.len(),
            more = page.last_evaluated_key.is_some(),
            "Queried in-memory lease partition"
        );

        Ok(page)
    }

    async fn put_if_absent(
        &self,
        domain: &CapacityDomain,
        record: &LeaseRecord,
    ) -> Result<(), StoreError> {
        let mut items = self.items.write().await;
        let key = (domain.hash_value.clone(), record.lease_id.clone());
        if items.contains_key(&key) {
            return Err(StoreError::ConditionFailed);
        }
        items.insert(key, record.clone());
        Ok(())
    }

    async fn delete_if_present(
        &self,
        domain: &CapacityDomain,
        lease_id: &str,
    ) -> Result<(), StoreError> {
        let key = (domain.hash_value.clone(), lease_id.to_string());
        match self.items.write().await.remove(&key) {
            Some(_) => Ok(()),
            None => Err(StoreError::ConditionFailed),
        }
    }
}
