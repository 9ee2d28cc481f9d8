//! Request dispatcher.
//!
//! Routes an event to acquire or release and guarantees a well-formed
//! [`LeaseResponse`] for every input: validation failures, store failures and
//! panics inside the policy all come back as structured errors.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::policy::LeaseManager;
use crate::response::{ErrorReason, LeaseEvent, LeaseResponse};

/// Entry point for lease requests.
#[derive(Clone)]
pub struct LeaseDispatcher {
    manager: LeaseManager,
}

impl LeaseDispatcher {
    #[must_use]
    pub fn new(manager: LeaseManager) -> Self {
        Self { manager }
    }

    #[must_use]
    pub fn manager(&self) -> &LeaseManager {
        &self.manager
    }

    /// Dispatch a raw JSON event.
    pub async fn dispatch_value(&self, value: Value) -> LeaseResponse {
        self.dispatch(LeaseEvent::from_value(&value)).await
    }

    /// Dispatch one event to its action.
    pub async fn dispatch(&self, event: LeaseEvent) -> LeaseResponse {
        let action = event.normalized_action();
        info!(action = %action, "Received lease action");

        let result = AssertUnwindSafe(self.route(&action, event))
            .catch_unwind()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(panic) => {
                let details = panic_message(panic.as_ref());
                error!(action = %action, details = %details, "Fatal error in lease dispatcher");
                self.manager.metrics().unhandled_exceptions.add(1, &[]);
                LeaseResponse::error(ErrorReason::UnhandledException, Some(details))
            }
        };

        debug!(action = %action, status = response.status(), "Lease manager result");
        response
    }

    async fn route(&self, action: &str, event: LeaseEvent) -> LeaseResponse {
        match action {
            "acquire" => LeaseResponse::from_acquire(self.manager.acquire(event.reference_id).await),
            "release" => {
                let Some(lease_id) = event.lease_id.filter(|id| !id.is_empty()) else {
                    warn!("Release requested without lease_id");
                    return LeaseResponse::error(ErrorReason::MissingLeaseId, None);
                };
                LeaseResponse::from_release(&lease_id, self.manager.release(&lease_id).await)
            }
            _ => {
                warn!(action = %action, "Unknown action");
                LeaseResponse::error(ErrorReason::UnknownAction, None)
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CapacityDomain, LeaseConfig};
    use crate::error::StoreError;
    use crate::model::{LeasePage, LeaseRecord, PageQuery};
    use crate::store::{LeaseStore, MemoryLeaseStore, MockLeaseStore};
    use serde_json::json;
    use std::sync::Arc;

    fn config() -> Arc<LeaseConfig> {
        Arc::new(LeaseConfig {
            table_name: "concurrency-leases-example".to_string(),
            domain: CapacityDomain::new("PK", "CONCURRENCY_LEASES", "SK"),
            max_concurrent: 1,
            ttl_seconds: 60,
        })
    }

    fn dispatcher_with(store: Arc<dyn LeaseStore>) -> LeaseDispatcher {
        LeaseDispatcher::new(LeaseManager::new(config(), store))
    }

    #[tokio::test]
    async fn test_routes_actions() {
        let dispatcher = dispatcher_with(Arc::new(MemoryLeaseStore::new()));

        let acquired = dispatcher.dispatch_value(json!({"action": "acquire"})).await;
        let LeaseResponse::Acquired { lease_id, .. } = acquired else {
            panic!("expected acquired");
        };

        let released = dispatcher
            .dispatch_value(json!({"action": "release", "lease_id": lease_id}))
            .await;
        assert_eq!(released.status(), "released");

        let unknown = dispatcher.dispatch_value(json!({"action": "unknown"})).await;
        assert_eq!(unknown.reason(), Some(ErrorReason::UnknownAction));
    }

    #[tokio::test]
    async fn test_action_is_case_insensitive() {
        let dispatcher = dispatcher_with(Arc::new(MemoryLeaseStore::new()));
        let response = dispatcher
            .dispatch_value(json!({"action": "  Acquire "}))
            .await;
        assert_eq!(response.status(), "acquired");
    }

    #[tokio::test]
    async fn test_missing_action_is_unknown() {
        let dispatcher = dispatcher_with(Arc::new(MockLeaseStore::new()));
        assert_eq!(
            dispatcher.dispatch_value(json!({})).await.reason(),
            Some(ErrorReason::UnknownAction)
        );
        assert_eq!(
            dispatcher.dispatch_value(json!(null)).await.reason(),
            Some(ErrorReason::UnknownAction)
        );
    }

    #[tokio::test]
    async fn test_release_without_lease_id_skips_store() {
        let mut store = MockLeaseStore::new();
        store.expect_delete_if_present().never();
        let dispatcher = dispatcher_with(Arc::new(store));

        let response = dispatcher.dispatch_value(json!({"action": "release"})).await;
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"status": "error", "reason": "missing_lease_id"})
        );
    }

    #[tokio::test]
    async fn test_mistyped_reference_id_still_acquires() {
        let dispatcher = dispatcher_with(Arc::new(MemoryLeaseStore::new()));

        let response = dispatcher
            .dispatch_value(json!({"action": "acquire", "reference_id": 42}))
            .await;
        assert_eq!(response.status(), "acquired");
    }

    #[tokio::test]
    async fn test_non_string_lease_id_is_missing() {
        let mut store = MockLeaseStore::new();
        store.expect_delete_if_present().never();
        let dispatcher = dispatcher_with(Arc::new(store));

        for event in [
            json!({"action": "release", "lease_id": 7}),
            json!({"action": "release", "lease_id": null}),
            json!({"action": "release", "lease_id": ""}),
        ] {
            assert_eq!(
                dispatcher.dispatch_value(event).await.reason(),
                Some(ErrorReason::MissingLeaseId)
            );
        }
    }

    struct ExplodingStore;

    #[async_trait::async_trait]
    impl LeaseStore for ExplodingStore {
        async fn query_page(
            &self,
            _domain: &CapacityDomain,
            _query: PageQuery,
        ) -> Result<LeasePage, StoreError> {
            panic!("explode")
        }

        async fn put_if_absent(
            &self,
            _domain: &CapacityDomain,
            _record: &LeaseRecord,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete_if_present(
            &self,
            _domain: &CapacityDomain,
            _lease_id: &str,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_unhandled_exception() {
        let dispatcher = dispatcher_with(Arc::new(ExplodingStore));

        let response = dispatcher.dispatch(LeaseEvent::acquire(None)).await;
        assert_eq!(
            response,
            LeaseResponse::error(ErrorReason::UnhandledException, Some("explode".to_string()))
        );
    }
}
