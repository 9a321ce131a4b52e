//! Integration tests for the rate-limit middleware.
//!
//! Tests cover:
//! - Fixed-window admit/reject behavior at the limit boundary
//! - Per-identity counting
//! - Window expiry opening a fresh budget
//! - Rate headers on admitted and rejected responses
//! - Explicit fail-open / fail-closed store failure behavior

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use eventgate_core::error::{ErrorCode, GateError};
use eventgate_core::middleware::{FailurePolicy, RateLimitLayer, RateLimitPolicy};
use eventgate_core::store::{KeyValueStore, MemoryStore};

// ============================================================================
// Fixtures
// ============================================================================

struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, GateError> {
        Err(GateError::new(ErrorCode::StoreUnavailable, "store down"))
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), GateError> {
        Err(GateError::new(ErrorCode::StoreUnavailable, "store down"))
    }

    async fn incr(&self, _key: &str, _ttl: Duration) -> Result<u64, GateError> {
        Err(GateError::new(ErrorCode::StoreUnavailable, "store down"))
    }

    async fn delete(&self, _key: &str) -> Result<(), GateError> {
        Err(GateError::new(ErrorCode::StoreUnavailable, "store down"))
    }

    async fn delete_by_pattern(&self, _pattern: &str) -> Result<u64, GateError> {
        Err(GateError::new(ErrorCode::StoreUnavailable, "store down"))
    }

    async fn exists(&self, _key: &str) -> Result<bool, GateError> {
        Err(GateError::new(ErrorCode::StoreUnavailable, "store down"))
    }
}

fn limited_router(store: Arc<dyn KeyValueStore>, policy: RateLimitPolicy) -> Router {
    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .layer(RateLimitLayer::new(store, policy))
}

async fn send(router: &Router, client: &str) -> Response {
    let request = Request::builder()
        .uri("/ping")
        .header("X-Forwarded-For", client)
        .body(Body::empty())
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

// ============================================================================
// Window Behavior
// ============================================================================

#[tokio::test]
async fn test_requests_within_limit_pass_then_429() {
    let router = limited_router(Arc::new(MemoryStore::new()), RateLimitPolicy::new(3, 60));

    for i in 1..=3 {
        let response = send(&router, "203.0.113.1").await;
        assert_eq!(response.status(), StatusCode::OK, "request {i} should pass");
    }

    let response = send(&router, "203.0.113.1").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = body_json(response).await;
    assert_eq!(body["error"], "Too many requests. Please try again later.");
}

#[tokio::test]
async fn test_identities_are_counted_separately() {
    let router = limited_router(Arc::new(MemoryStore::new()), RateLimitPolicy::new(2, 60));

    for _ in 0..2 {
        assert_eq!(send(&router, "203.0.113.1").await.status(), StatusCode::OK);
    }
    assert_eq!(
        send(&router, "203.0.113.1").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    // A different client still has its full budget.
    assert_eq!(send(&router, "198.51.100.2").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_window_expiry_opens_fresh_budget() {
    let router = limited_router(Arc::new(MemoryStore::new()), RateLimitPolicy::new(2, 1));

    assert_eq!(send(&router, "203.0.113.1").await.status(), StatusCode::OK);
    assert_eq!(send(&router, "203.0.113.1").await.status(), StatusCode::OK);
    assert_eq!(
        send(&router, "203.0.113.1").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(send(&router, "203.0.113.1").await.status(), StatusCode::OK);
}

// ============================================================================
// Headers
// ============================================================================

#[tokio::test]
async fn test_admitted_response_carries_rate_headers() {
    let router = limited_router(Arc::new(MemoryStore::new()), RateLimitPolicy::new(5, 60));

    let response = send(&router, "203.0.113.1").await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers["X-RateLimit-Limit"], "5");
    assert_eq!(headers["X-RateLimit-Remaining"], "4");
    assert_eq!(headers["X-RateLimit-Reset"], "60");
}

#[tokio::test]
async fn test_rejected_response_carries_retry_after() {
    let router = limited_router(Arc::new(MemoryStore::new()), RateLimitPolicy::new(1, 60));

    send(&router, "203.0.113.1").await;
    let response = send(&router, "203.0.113.1").await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let headers = response.headers();
    assert_eq!(headers["Retry-After"], "60");
    assert_eq!(headers["X-RateLimit-Remaining"], "0");
}

// ============================================================================
// Store Failure Policy
// ============================================================================

#[tokio::test]
async fn test_store_failure_fails_open_by_default() {
    let router = limited_router(Arc::new(FailingStore), RateLimitPolicy::new(1, 60));

    // Every request passes while the counter store is down.
    for _ in 0..5 {
        assert_eq!(send(&router, "203.0.113.1").await.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_store_failure_fails_closed_when_configured() {
    let router = limited_router(
        Arc::new(FailingStore),
        RateLimitPolicy::new(1, 60).on_store_failure(FailurePolicy::FailClosed),
    );

    let response = send(&router, "203.0.113.1").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
