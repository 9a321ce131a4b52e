//! Fixed-window rate limiting middleware.
//!
//! Counts requests per client identity in the shared store under
//! `rate:<identity>` keys. The count is an atomic increment-and-compare:
//! the store's `incr` sets the window TTL only when the key is created, so
//! concurrent requests can never double-admit or reset the window
//! mid-flight.
//!
//! # Example
//!
//! ```rust,ignore
//! use eventgate_core::middleware::rate_limit::{RateLimitLayer, RateLimitPolicy};
//!
//! let app = Router::new()
//!     .route("/api/v1/auth/login", post(login))
//!     .layer(RateLimitLayer::new(store, RateLimitPolicy::new(20, 60)));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use metrics::counter;
use std::{
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tower::{Layer, Service};
use tracing::warn;

use crate::store::KeyValueStore;

use super::FailurePolicy;

// ═══════════════════════════════════════════════════════════════════════════════
// Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-route-group rate limit policy.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Requests allowed per window
    pub limit: u32,

    /// Window length in seconds
    pub window_secs: u64,

    /// Behavior when the counter store is unreachable
    pub failure: FailurePolicy,

    /// Store key prefix
    pub key_prefix: String,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            limit: 10,
            window_secs: 60,
            failure: FailurePolicy::FailOpen,
            key_prefix: "rate:".to_string(),
        }
    }
}

impl RateLimitPolicy {
    pub fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            limit,
            window_secs,
            ..Default::default()
        }
    }

    pub fn on_store_failure(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Client Identity
// ═══════════════════════════════════════════════════════════════════════════════

/// Derive the client identity for counting: first proxy header, then the
/// socket address, then a shared `"unknown"` bucket.
fn extract_client_id(request: &Request<Body>) -> String {
    // X-Forwarded-For carries a comma-separated chain; the first entry is
    // the originating client.
    if let Some(forwarded) = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(client) = forwarded.split(',').next() {
            let client = client.trim();
            if !client.is_empty() {
                return client.to_string();
            }
        }
    }

    if let Some(real_ip) = request
        .headers()
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
    {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Rate limiting layer for Tower.
#[derive(Clone)]
pub struct RateLimitLayer {
    store: Arc<dyn KeyValueStore>,
    policy: Arc<RateLimitPolicy>,
}

impl RateLimitLayer {
    pub fn new(store: Arc<dyn KeyValueStore>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            policy: Arc::new(policy),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            store: self.store.clone(),
            policy: self.policy.clone(),
        }
    }
}

/// Rate limiting middleware service.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    store: Arc<dyn KeyValueStore>,
    policy: Arc<RateLimitPolicy>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let store = self.store.clone();
        let policy = self.policy.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let client_id = extract_client_id(&request);
            let key = format!("{}{}", policy.key_prefix, client_id);
            let window = Duration::from_secs(policy.window_secs);

            let count = match store.incr(&key, window).await {
                Ok(count) => count,
                Err(e) => match policy.failure {
                    FailurePolicy::FailOpen => {
                        warn!(error = %e, client = %client_id, "rate limit store unreachable, failing open");
                        counter!("rate_limit_store_failures_total").increment(1);
                        return inner.call(request).await;
                    }
                    FailurePolicy::FailClosed => {
                        warn!(error = %e, client = %client_id, "rate limit store unreachable, failing closed");
                        return Ok(store_unavailable_response());
                    }
                },
            };

            if count > policy.limit as u64 {
                counter!("rate_limit_rejected_total").increment(1);
                return Ok(rejected_response(&policy));
            }

            let mut response = inner.call(request).await?;
            let remaining = policy.limit as u64 - count;
            attach_rate_headers(&mut response, &policy, remaining);
            Ok(response)
        })
    }
}

fn rejected_response(policy: &RateLimitPolicy) -> Response {
    let body = serde_json::json!({
        "error": "Too many requests. Please try again later."
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    if let Ok(retry) = HeaderValue::from_str(&policy.window_secs.to_string()) {
        response.headers_mut().insert("Retry-After", retry);
    }
    attach_rate_headers(&mut response, policy, 0);
    response
}

fn store_unavailable_response() -> Response {
    let body = serde_json::json!({ "error": "Service temporarily unavailable." });
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

fn attach_rate_headers(response: &mut Response, policy: &RateLimitPolicy, remaining: u64) {
    let headers = response.headers_mut();
    if let Ok(limit) = HeaderValue::from_str(&policy.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", limit);
    }
    if let Ok(remaining) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", remaining);
    }
    if let Ok(reset) = HeaderValue::from_str(&policy.window_secs.to_string()) {
        headers.insert("X-RateLimit-Reset", reset);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_header(name: &str, value: &str) -> Request<Body> {
        Request::builder()
            .header(name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_forwarded_for_takes_first_entry() {
        let request = request_with_header("X-Forwarded-For", "203.0.113.9, 10.0.0.1");
        assert_eq!(extract_client_id(&request), "203.0.113.9");
    }

    #[test]
    fn test_real_ip_fallback() {
        let request = request_with_header("X-Real-IP", "198.51.100.4");
        assert_eq!(extract_client_id(&request), "198.51.100.4");
    }

    #[test]
    fn test_socket_addr_fallback() {
        let mut request = Request::builder().body(Body::empty()).unwrap();
        let addr: SocketAddr = "192.0.2.7:52000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(extract_client_id(&request), "192.0.2.7");
    }

    #[test]
    fn test_unknown_bucket() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_client_id(&request), "unknown");
    }

    #[test]
    fn test_default_policy() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.limit, 10);
        assert_eq!(policy.window_secs, 60);
        assert_eq!(policy.failure, FailurePolicy::FailOpen);
        assert_eq!(policy.key_prefix, "rate:");
    }
}
