//! Session authentication and authorization middleware.
//!
//! A tower `Layer`/`Service` pair that gates a route group behind a bearer
//! access token. Checks run strictly in order and short-circuit on the
//! first failure:
//!
//! 1. extract `Authorization: Bearer <token>`
//! 2. blacklist lookup
//! 3. signature/expiry verification
//! 4. attach [`CurrentUser`] to request extensions
//! 5. role gate (when the policy restricts roles)
//! 6. ownership gate (when the policy locks the `:id` path parameter)
//! 7. call the inner service
//!
//! The gate has no side effects beyond the attached identity.
//!
//! # Example
//!
//! ```rust,ignore
//! use eventgate_core::middleware::session::{SessionGate, SessionLayer, SessionPolicy};
//! use eventgate_core::token::Role;
//!
//! let layer = SessionLayer::new(
//!     gate.clone(),
//!     SessionPolicy::new().allow_roles([Role::Admin, Role::Manager]),
//! );
//! let app = Router::new()
//!     .route("/api/v1/events", post(create_event))
//!     .layer(layer);
//! ```

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use metrics::counter;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::store::TokenBlacklist;
use crate::token::{Role, TokenCodec};

use super::FailurePolicy;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Session gate rejections.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Access denied. No token provided.")]
    MissingToken,

    #[error("Access denied. Token is blacklisted.")]
    Blacklisted,

    #[error("Invalid or expired token.")]
    InvalidToken,

    #[error("Forbidden. You do not have access.")]
    Forbidden,

    #[error("Service temporarily unavailable.")]
    StoreUnavailable,
}

impl SessionError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::Blacklisted | Self::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    const fn reason(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::Blacklisted => "blacklisted",
            Self::InvalidToken => "invalid_token",
            Self::Forbidden => "forbidden",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        counter!(
            "session_denied_total",
            "reason" => self.reason()
        )
        .increment(1);

        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy and Identity
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-route-group authorization policy.
#[derive(Debug, Clone, Default)]
pub struct SessionPolicy {
    /// Roles allowed through the gate. Empty means any authenticated role.
    pub allowed_roles: Vec<Role>,

    /// When set, the numeric `:id` path parameter must equal the caller's
    /// user id. Admins bypass this check.
    pub id_lock: bool,

    /// Behavior when the blacklist store is unreachable.
    pub failure: FailurePolicy,
}

impl SessionPolicy {
    /// Any authenticated user, fail-closed on store errors.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.allowed_roles = roles.into_iter().collect();
        self
    }

    pub fn lock_to_owner(mut self) -> Self {
        self.id_lock = true;
        self
    }

    pub fn on_store_failure(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }
}

/// The authenticated caller, attached to request extensions by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
    pub role: Role,
}

impl CurrentUser {
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = SessionError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .copied()
            .ok_or(SessionError::MissingToken)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Gate
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared verification machinery, one per process; policies vary per layer.
pub struct SessionGate {
    codec: TokenCodec,
    blacklist: TokenBlacklist,
}

impl SessionGate {
    pub fn new(codec: TokenCodec, blacklist: TokenBlacklist) -> Self {
        Self { codec, blacklist }
    }

    /// Run the ordered checks against one request. Returns the identity to
    /// attach, or the rejection to serve.
    ///
    /// Takes the token and URI by value so the caller's future stays
    /// `Send`; the request body is never touched.
    async fn check(
        &self,
        policy: &SessionPolicy,
        token: Option<String>,
        uri: &Uri,
    ) -> Result<CurrentUser, SessionError> {
        // 1. Bearer token extraction.
        let token = token.ok_or(SessionError::MissingToken)?;

        // 2. Blacklist lookup. A store failure follows the policy's
        //    explicit failure mode, never an ambient 500.
        match self.blacklist.is_blacklisted(&token).await {
            Ok(true) => return Err(SessionError::Blacklisted),
            Ok(false) => {}
            Err(e) => match policy.failure {
                FailurePolicy::FailClosed => {
                    warn!(error = %e, "blacklist store unreachable, failing closed");
                    return Err(SessionError::StoreUnavailable);
                }
                FailurePolicy::FailOpen => {
                    warn!(error = %e, "blacklist store unreachable, failing open");
                    counter!("session_store_failures_total").increment(1);
                }
            },
        }

        // 3. Signature and expiry.
        let claims = self.codec.verify_access(&token).map_err(|e| {
            debug!(error = %e, "access token rejected");
            SessionError::InvalidToken
        })?;

        // 4. Identity.
        let user = CurrentUser {
            id: claims.sub,
            role: claims.role,
        };

        // 5. Role gate. Admin passes only if listed; the admin bypass
        //    belongs to the ownership check, not the role check.
        if !policy.allowed_roles.is_empty() && !policy.allowed_roles.contains(&user.role) {
            return Err(SessionError::Forbidden);
        }

        // 6. Ownership gate.
        if policy.id_lock && !user.is_admin() {
            let path_id = extract_path_id(uri).ok_or(SessionError::Forbidden)?;
            if path_id != user.id {
                return Err(SessionError::Forbidden);
            }
        }

        Ok(user)
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
fn extract_bearer(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
}

/// The resource id is the trailing numeric path segment
/// (`/api/v1/users/42` → 42). Tower layers run before axum resolves path
/// parameters, so the URI is parsed directly.
fn extract_path_id(uri: &Uri) -> Option<i64> {
    uri.path()
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .and_then(|segment| segment.parse::<i64>().ok())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Session layer for Tower.
#[derive(Clone)]
pub struct SessionLayer {
    gate: Arc<SessionGate>,
    policy: Arc<SessionPolicy>,
}

impl SessionLayer {
    pub fn new(gate: Arc<SessionGate>, policy: SessionPolicy) -> Self {
        Self {
            gate,
            policy: Arc::new(policy),
        }
    }
}

impl<S> Layer<S> for SessionLayer {
    type Service = SessionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService {
            inner,
            gate: self.gate.clone(),
            policy: self.policy.clone(),
        }
    }
}

/// Session middleware service.
#[derive(Clone)]
pub struct SessionService<S> {
    inner: S,
    gate: Arc<SessionGate>,
    policy: Arc<SessionPolicy>,
}

impl<S> Service<Request<Body>> for SessionService<S>
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

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let gate = self.gate.clone();
        let policy = self.policy.clone();
        let mut inner = self.inner.clone();

        // Owned copies so the future does not borrow the request (whose
        // body is !Sync) across an await.
        let token = extract_bearer(&request).map(str::to_owned);
        let uri = request.uri().clone();

        Box::pin(async move {
            match gate.check(&policy, token, &uri).await {
                Ok(user) => {
                    request.extensions_mut().insert(user);
                    inner.call(request).await
                }
                Err(e) => Ok(e.into_response()),
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::convert::Infallible;

    fn assert_send<T: Send>(value: T) -> T {
        value
    }

    /// The service future must stay `Send` so it can run on the
    /// multi-threaded runtime; holding the request across the blacklist
    /// await would break this.
    #[tokio::test]
    async fn test_call_future_is_send() {
        let codec = TokenCodec::new("send-check");
        let blacklist = TokenBlacklist::new(Arc::new(MemoryStore::new()));
        let gate = Arc::new(SessionGate::new(codec.clone(), blacklist));
        let layer = SessionLayer::new(gate, SessionPolicy::new());

        let inner = tower::service_fn(|_request: Request<Body>| async {
            Ok::<_, Infallible>(axum::response::Response::new(Body::empty()))
        });
        let mut service = layer.layer(inner);

        let token = codec.sign_access(3, Role::Staff).unwrap();
        let request = Request::builder()
            .uri("/users/3")
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();

        let response = assert_send(service.call(request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_extract_path_id() {
        let uri: Uri = "/api/v1/users/42".parse().unwrap();
        assert_eq!(extract_path_id(&uri), Some(42));

        let trailing: Uri = "/api/v1/users/42/".parse().unwrap();
        assert_eq!(extract_path_id(&trailing), Some(42));

        let no_id: Uri = "/api/v1/users".parse().unwrap();
        assert_eq!(extract_path_id(&no_id), None);
    }

    #[test]
    fn test_extract_bearer() {
        let request = Request::builder()
            .header("Authorization", "Bearer abc.def.ghi")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&request), Some("abc.def.ghi"));

        let bare = Request::builder()
            .header("Authorization", "abc.def.ghi")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&bare), None);

        let empty = Request::builder()
            .header("Authorization", "Bearer ")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_bearer(&empty), None);

        let missing = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_bearer(&missing), None);
    }

    #[test]
    fn test_policy_builder() {
        let policy = SessionPolicy::new()
            .allow_roles([Role::Admin, Role::Manager])
            .lock_to_owner()
            .on_store_failure(FailurePolicy::FailOpen);

        assert_eq!(policy.allowed_roles, vec![Role::Admin, Role::Manager]);
        assert!(policy.id_lock);
        assert_eq!(policy.failure, FailurePolicy::FailOpen);
    }

    #[test]
    fn test_default_policy_fails_closed() {
        assert_eq!(SessionPolicy::new().failure, FailurePolicy::FailClosed);
    }
}
