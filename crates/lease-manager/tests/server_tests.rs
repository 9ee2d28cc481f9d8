//! HTTP tests for the lease service router.
//!
//! Each test binds the router to an ephemeral port and drives it with a real
//! HTTP client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lease_manager::server::{build_router, AppState};
use lease_manager::{
    CapacityDomain, LeaseConfig, LeaseDispatcher, LeaseManager, LeasePage, LeaseRecord,
    LeaseStore, MemoryLeaseStore, PageQuery, StoreError,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Store whose queries never finish in time.
struct StalledStore;

#[async_trait]
impl LeaseStore for StalledStore {
    async fn query_page(
        &self,
        _domain: &CapacityDomain,
        _query: PageQuery,
    ) -> Result<LeasePage, StoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(LeasePage::default())
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

async fn spawn_service(max_concurrent: u32) -> SocketAddr {
    spawn_with_store(max_concurrent, Arc::new(MemoryLeaseStore::new()), None).await
}

async fn spawn_with_store(
    max_concurrent: u32,
    store: Arc<dyn LeaseStore>,
    lease_timeout: Option<Duration>,
) -> SocketAddr {
    let config = Arc::new(LeaseConfig {
        table_name: "concurrency-leases-test".to_string(),
        domain: CapacityDomain::new("PK", "CONCURRENCY_LEASES", "SK"),
        max_concurrent,
        ttl_seconds: 300,
    });
    let manager = LeaseManager::new(config, store);
    let mut state = AppState::new(LeaseDispatcher::new(manager));
    if let Some(timeout) = lease_timeout {
        state = state.with_lease_timeout(timeout);
    }
    let app = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn post_lease(client: &reqwest::Client, addr: SocketAddr, body: &Value) -> (u16, Value) {
    let response = client
        .post(format!("http://{addr}/lease"))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_acquire_wait_release_over_http() {
    let addr = spawn_service(1).await;
    let client = reqwest::Client::new();

    let (status, acquired) = post_lease(
        &client,
        addr,
        &json!({"action": "acquire", "reference_id": "job-123"}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(acquired["status"], json!("acquired"));
    let lease_id = acquired["lease_id"].as_str().unwrap().to_string();
    assert!(acquired["lease_expires_at"].is_i64());

    let (status, wait) = post_lease(&client, addr, &json!({"action": "acquire"})).await;
    assert_eq!(status, 200);
    assert_eq!(wait, json!({"status": "wait", "current_running": 1}));

    let (status, released) = post_lease(
        &client,
        addr,
        &json!({"action": "release", "lease_id": lease_id}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(released, json!({"status": "released", "lease_id": lease_id}));
}

#[tokio::test]
async fn test_errors_are_returned_with_ok_status() {
    let addr = spawn_service(1).await;
    let client = reqwest::Client::new();

    let (status, unknown) = post_lease(&client, addr, &json!({"action": "renew"})).await;
    assert_eq!(status, 200);
    assert_eq!(unknown, json!({"status": "error", "reason": "unknown_action"}));

    let (status, missing) = post_lease(&client, addr, &json!({"action": "release"})).await;
    assert_eq!(status, 200);
    assert_eq!(missing, json!({"status": "error", "reason": "missing_lease_id"}));
}

#[tokio::test]
async fn test_invalid_body_is_unknown_action() {
    let addr = spawn_service(1).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/lease"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], json!("unknown_action"));
}

#[tokio::test]
async fn test_slow_store_yields_structured_timeout() {
    let addr = spawn_with_store(
        1,
        Arc::new(StalledStore),
        Some(Duration::from_millis(100)),
    )
    .await;
    let client = reqwest::Client::new();

    let (status, body) = post_lease(&client, addr, &json!({"action": "acquire"})).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], json!("error"));
    assert_eq!(body["reason"], json!("boto_error"));
    assert!(body["details"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_health_and_readiness() {
    let addr = spawn_service(4).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], json!("healthy"));
    assert_eq!(health["service"], json!("lease-manager"));

    let ready: Value = client
        .get(format!("http://{addr}/ready"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ready["status"], json!("ready"));
    assert_eq!(ready["domain"], json!("CONCURRENCY_LEASES"));
    assert_eq!(ready["max_concurrent"], json!(4));
}
