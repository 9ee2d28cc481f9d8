//! # Kubernetes Lease Store
//!
//! Persists each concurrency lease as a `coordination.k8s.io/v1` Lease object.
//! The capacity domain partition is a label selector, the lease id is the
//! object name, and the expiry lives in an annotation.
//!
//! Store semantics map onto the API server as follows:
//!
//! - list without `resourceVersion` is served from etcd with a quorum read,
//!   and `limit`/`continue` provide pagination
//! - create returns 409 when the name is taken
//! - delete is guarded by a UID precondition after checking the partition label
//!
//! Kubernetes has no native TTL, so deployments must run the
//! [`LeaseReaper`](crate::reaper::LeaseReaper) alongside this store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease as K8sLease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, DeleteParams, ListParams, PostParams, Preconditions};
use kube::core::ObjectMeta;
use kube::{Client, Error as KubeError};
use tracing::{debug, instrument, warn};

use super::LeaseStore;
use crate::config::CapacityDomain;
use crate::error::StoreError;
use crate::model::{LeasePage, LeaseRecord, LeaseSummary, PageQuery};

/// Prefix for labels and annotations written on lease objects.
pub const LABEL_PREFIX: &str = "concurrency.5dlabs.com";

/// Default list page size.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

const ANNOTATION_REFERENCE_ID: &str = "concurrency.5dlabs.com/reference-id";
const ANNOTATION_STATUS: &str = "concurrency.5dlabs.com/status";
const ANNOTATION_STARTED_AT: &str = "concurrency.5dlabs.com/started-at";
const ANNOTATION_TTL: &str = "concurrency.5dlabs.com/ttl";

const OP_LIST: &str = "ListLeases";
const OP_CREATE: &str = "CreateLease";
const OP_DELETE: &str = "DeleteLease";

/// Lease store backed by Kubernetes Lease objects in one namespace.
#[derive(Clone)]
pub struct KubeLeaseStore {
    client: Client,
    namespace: String,
    page_size: u32,
}

impl KubeLeaseStore {
    /// Create a store writing leases into `namespace`.
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the list page size (default: 100)
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn api(&self) -> Api<K8sLease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Label key identifying the partition attribute of `domain`.
#[must_use]
pub fn partition_label_key(domain: &CapacityDomain) -> String {
    format!("{LABEL_PREFIX}/{}", domain.hash_key)
}

/// Label selector matching every lease of `domain`.
#[must_use]
pub fn partition_selector(domain: &CapacityDomain) -> String {
    format!("{}={}", partition_label_key(domain), domain.hash_value)
}

/// Build the Lease object persisted for `record`.
#[must_use]
pub fn lease_object(domain: &CapacityDomain, namespace: &str, record: &LeaseRecord) -> K8sLease {
    let started = DateTime::<Utc>::from_timestamp(record.started_at, 0).unwrap_or_else(Utc::now);

    let mut labels = BTreeMap::new();
    labels.insert(partition_label_key(domain), domain.hash_value.clone());

    let mut annotations = BTreeMap::new();
    if let Some(reference_id) = &record.reference_id {
        annotations.insert(ANNOTATION_REFERENCE_ID.to_string(), reference_id.clone());
    }
    annotations.insert(ANNOTATION_STATUS.to_string(), record.status.clone());
    annotations.insert(
        ANNOTATION_STARTED_AT.to_string(),
        record.started_at.to_string(),
    );
    annotations.insert(ANNOTATION_TTL.to_string(), record.expires_at.to_string());

    let duration = record.expires_at.saturating_sub(record.started_at);

    K8sLease {
        metadata: ObjectMeta {
            name: Some(record.lease_id.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(
                record
                    .reference_id
                    .clone()
                    .unwrap_or_else(|| record.lease_id.clone()),
            ),
            lease_duration_seconds: Some(i32::try_from(duration).unwrap_or(i32::MAX)),
            acquire_time: Some(MicroTime(started)),
            renew_time: Some(MicroTime(started)),
            ..Default::default()
        }),
    }
}

/// Project a Lease object onto the query projection.
///
/// Returns `None` for objects without a name. When no expiry can be derived
/// the lease is treated as never expiring, so it keeps counting against the
/// ceiling rather than risking over-admission.
#[must_use]
pub fn lease_summary(lease: &K8sLease) -> Option<LeaseSummary> {
    let lease_id = lease.metadata.name.clone()?;

    let from_annotation = lease
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_TTL))
        .and_then(|ttl| ttl.parse::<i64>().ok());

    let from_spec = || {
        let spec = lease.spec.as_ref()?;
        let renew_time = spec.renew_time.as_ref()?;
        let duration_seconds = spec.lease_duration_seconds?;
        Some(renew_time.0.timestamp() + i64::from(duration_seconds))
    };

    let expires_at = from_annotation.or_else(from_spec).unwrap_or_else(|| {
        warn!(lease_id = %lease_id, "Lease has no readable expiry, counting it as live");
        i64::MAX
    });

    Some(LeaseSummary {
        lease_id,
        expires_at,
    })
}

fn in_partition(lease: &K8sLease, domain: &CapacityDomain) -> bool {
    lease
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(&partition_label_key(domain)))
        .is_some_and(|value| *value == domain.hash_value)
}

/// Classify a Kubernetes client error into the store taxonomy.
#[must_use]
pub fn classify_error(operation: &'static str, err: KubeError) -> StoreError {
    match err {
        KubeError::Api(response) => StoreError::client(operation, response.reason, response.message),
        KubeError::SerdeError(e) => StoreError::Unexpected(format!("{operation}: {e}")),
        other => StoreError::transport(operation, other.to_string()),
    }
}

fn is_precondition_failure(err: &KubeError, codes: &[u16]) -> bool {
    matches!(err, KubeError::Api(response) if codes.contains(&response.code))
}

#[async_trait]
impl LeaseStore for KubeLeaseStore {
    #[instrument(skip(self, query), fields(domain = %domain, namespace = %self.namespace))]
    async fn query_page(
        &self,
        domain: &CapacityDomain,
        query: PageQuery,
    ) -> Result<LeasePage, StoreError> {
        let mut params = ListParams::default()
            .labels(&partition_selector(domain))
            .limit(self.page_size);
        if let Some(token) = &query.exclusive_start_key {
            params = params.continue_token(token);
        }

        let list = self
            .api()
            .list(&params)
            .await
            .map_err(|e| classify_error(OP_LIST, e))?;

        let items: Vec<LeaseSummary> = list
            .items
            .iter()
            .filter_map(lease_summary)
            .filter(|summary| query.live_at.is_none_or(|now| summary.is_live_at(now)))
            .collect();

        let last_evaluated_key = list.metadata.continue_.filter(|token| !token.is_empty());

        debug!(
            returned = items.len(),
            more = last_evaluated_key.is_some(),
            "Listed lease objects"
        );

        Ok(LeasePage {
            items,
            last_evaluated_key,
        })
    }

    #[instrument(skip(self, record), fields(domain = %domain, lease_id = %record.lease_id))]
    async fn put_if_absent(
        &self,
        domain: &CapacityDomain,
        record: &LeaseRecord,
    ) -> Result<(), StoreError> {
        let lease = lease_object(domain, &self.namespace, record);

        match self.api().create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(()),
            Err(e) if is_precondition_failure(&e, &[409]) => Err(StoreError::ConditionFailed),
            Err(e) => Err(classify_error(OP_CREATE, e)),
        }
    }

    #[instrument(skip(self), fields(domain = %domain))]
    async fn delete_if_present(
        &self,
        domain: &CapacityDomain,
        lease_id: &str,
    ) -> Result<(), StoreError> {
        let api = self.api();

        let existing = api
            .get_opt(lease_id)
            .await
            .map_err(|e| classify_error(OP_DELETE, e))?;

        let Some(existing) = existing else {
            return Err(StoreError::ConditionFailed);
        };

        if !in_partition(&existing, domain) {
            debug!(lease_id = %lease_id, "Lease object belongs to another partition");
            return Err(StoreError::ConditionFailed);
        }

        let params = DeleteParams {
            preconditions: Some(Preconditions {
                uid: existing.metadata.uid.clone(),
                resource_version: None,
            }),
            ..DeleteParams::default()
        };

        match api.delete(lease_id, &params).await {
            Ok(_) => Ok(()),
            Err(e) if is_precondition_failure(&e, &[404, 409]) => Err(StoreError::ConditionFailed),
            Err(e) => Err(classify_error(OP_DELETE, e)),
        }
    }
}
