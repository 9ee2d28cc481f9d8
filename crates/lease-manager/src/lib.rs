//! Distributed concurrency limiting with expiring leases.
//!
//! Callers ask for a lease before starting a unit of work and hand it back
//! when done. Each capacity domain admits at most `MAX_CONCURRENT_LEASES`
//! live leases; a lease that is never released stops counting once its TTL
//! has passed.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use lease_manager::{LeaseConfig, LeaseDispatcher, LeaseEvent, LeaseManager, MemoryLeaseStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Arc::new(LeaseConfig::from_env()?);
//! let manager = LeaseManager::new(config, Arc::new(MemoryLeaseStore::new()));
//! let dispatcher = LeaseDispatcher::new(manager);
//!
//! let response = dispatcher.dispatch(LeaseEvent::acquire(Some("job-123"))).await;
//! println!("{}", serde_json::to_string(&response)?);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`LeaseStore`] is the seam to the backing store; [`KubeLeaseStore`]
//!   keeps leases as `coordination.k8s.io/v1` Lease objects and
//!   [`MemoryLeaseStore`] keeps them in process
//! - [`AdmissionCounter`] counts live leases page by page
//! - [`LeaseLedger`] performs the conditional create and delete
//! - [`LeaseManager`] applies the admission policy
//! - [`LeaseDispatcher`] turns any event into a [`LeaseResponse`]
//! - [`LeaseReaper`] deletes expired records the store would otherwise keep

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod counter;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod policy;
pub mod reaper;
pub mod response;
pub mod server;
pub mod store;

pub use config::{CapacityDomain, ConfigError, LeaseConfig};
pub use counter::{AdmissionCounter, LiveCount};
pub use dispatcher::LeaseDispatcher;
pub use error::{LeaseError, StoreError};
pub use ledger::{CreateOutcome, DeleteOutcome, LeaseLedger};
pub use metrics::LeaseMetrics;
pub use model::{LeasePage, LeaseRecord, LeaseSummary, PageQuery};
pub use policy::{AcquireOutcome, LeaseManager, ReleaseOutcome};
pub use reaper::{LeaseReaper, ReapReport};
pub use response::{ErrorReason, LeaseEvent, LeaseResponse};
pub use store::{KubeLeaseStore, LeaseStore, MemoryLeaseStore};
