//! HTTP transport for the lease dispatcher.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, warn, Level};

use crate::dispatcher::LeaseDispatcher;
use crate::response::{ErrorReason, LeaseResponse};

/// Default budget for one lease request, store round trips included.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(25);

/// Router-wide backstop; answers 408 with an empty body.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Request dispatcher.
    pub dispatcher: Arc<LeaseDispatcher>,
    /// Budget for one `/lease` request before a structured error is returned.
    pub lease_timeout: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(dispatcher: LeaseDispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }
}

/// Build the HTTP router for the lease service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/lease", post(lease_handler))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    REQUEST_TIMEOUT,
                )),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "lease-manager",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness check endpoint.
async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    let config = state.dispatcher.manager().config();
    Json(json!({
        "status": "ready",
        "domain": config.domain.hash_value,
        "max_concurrent": config.max_concurrent
    }))
}

/// Handle an acquire or release request.
///
/// Always answers 200 with a structured body; a body that is not valid JSON
/// is dispatched as an empty event. A request that outlives `lease_timeout`
/// is abandoned and reported as `boto_error`. A create already sent may still
/// land; that lease then lapses at its TTL.
pub async fn lease_handler(State(state): State<AppState>, body: Bytes) -> Json<LeaseResponse> {
    let value = serde_json::from_slice::<Value>(&body).unwrap_or_else(|e| {
        debug!(error = %e, "Lease request body is not JSON");
        Value::Null
    });

    match tokio::time::timeout(state.lease_timeout, state.dispatcher.dispatch_value(value)).await {
        Ok(response) => Json(response),
        Err(_) => {
            warn!(
                timeout_ms = u64::try_from(state.lease_timeout.as_millis()).unwrap_or(u64::MAX),
                "Lease request timed out"
            );
            Json(LeaseResponse::error(
                ErrorReason::TransportError,
                Some(format!(
                    "lease request timed out after {}ms",
                    state.lease_timeout.as_millis()
                )),
            ))
        }
    }
}
