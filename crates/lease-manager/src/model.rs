//! Lease records and store query types.

use serde::{Deserialize, Serialize};

/// Status attribute written on every lease record.
pub const STATUS_ACTIVE: &str = "active";

/// A lease as persisted in the store. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Store-side discriminator within the domain partition.
    pub lease_id: String,
    /// Caller correlation token, stored verbatim.
    pub reference_id: Option<String>,
    pub status: String,
    /// Admission time, seconds since epoch.
    pub started_at: i64,
    /// `started_at + ttl`, seconds since epoch.
    pub expires_at: i64,
}

impl LeaseRecord {
    /// Build an active lease admitted at `started_at`.
    #[must_use]
    pub fn active(
        lease_id: impl Into<String>,
        reference_id: Option<String>,
        started_at: i64,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            lease_id: lease_id.into(),
            reference_id,
            status: STATUS_ACTIVE.to_string(),
            started_at,
            expires_at: started_at.saturating_add(ttl_seconds),
        }
    }

    /// Whether the lease is still live at `now`.
    #[must_use]
    pub const fn is_live_at(&self, now: i64) -> bool {
        self.expires_at > now
    }

    #[must_use]
    pub fn summary(&self) -> LeaseSummary {
        LeaseSummary {
            lease_id: self.lease_id.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Projection of a lease returned by partition queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSummary {
    pub lease_id: String,
    pub expires_at: i64,
}

impl LeaseSummary {
    #[must_use]
    pub const fn is_live_at(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// One page request against a domain partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    /// Only return items with `expires_at > live_at` when set.
    pub live_at: Option<i64>,
    /// Continuation key returned by the previous page.
    pub exclusive_start_key: Option<String>,
}

impl PageQuery {
    /// Query for leases still live at `now`.
    #[must_use]
    pub const fn live_at(now: i64) -> Self {
        Self {
            live_at: Some(now),
            exclusive_start_key: None,
        }
    }

    /// Query for every lease in the partition, expired or not.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            live_at: None,
            exclusive_start_key: None,
        }
    }

    #[must_use]
    pub fn starting_after(mut self, key: Option<String>) -> Self {
        self.exclusive_start_key = key;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeasePage {
    pub items: Vec<LeaseSummary>,
    /// Present when more items may follow.
    pub last_evaluated_key: Option<String>,
}
