//! HTTP surface.
//!
//! One router, two rate-limit tiers: `/api/v1/auth/*` carries the tighter
//! limiter (credential-guessing surface), the rest of `/api/v1` the looser
//! one. `/health` sits outside both.

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::AuthSessions;
use crate::config::Config;
use crate::middleware::{
    session::SessionGate, RateLimitLayer, RateLimitPolicy, SessionLayer, SessionPolicy,
};
use crate::store::KeyValueStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: AuthSessions,
}

/// Build the API router.
///
/// ```rust,ignore
/// let state = AppState { sessions };
/// let app = build_router(state, gate, store, &config);
/// ```
pub fn build_router(
    state: AppState,
    gate: Arc<SessionGate>,
    store: Arc<dyn KeyValueStore>,
    config: &Config,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let auth_limiter = RateLimitLayer::new(
        store.clone(),
        RateLimitPolicy::new(config.rate_limit.auth_limit, config.rate_limit.window_secs),
    );
    let api_limiter = RateLimitLayer::new(
        store,
        RateLimitPolicy::new(config.rate_limit.api_limit, config.rate_limit.window_secs),
    );

    // Authenticated caller, any role.
    let session_any = SessionLayer::new(gate, SessionPolicy::new());

    let auth_routes = Router::new()
        .route("/login", post(handlers::login))
        .route("/token/refresh", post(handlers::refresh))
        .route("/logout", post(handlers::logout).layer(session_any.clone()))
        .route("/verify-email", get(handlers::verify_email))
        .layer(auth_limiter);

    let api_routes = Router::new()
        .route("/me", get(handlers::me).layer(session_any))
        .layer(api_limiter);

    let v1 = Router::new().nest("/auth", auth_routes).merge(api_routes);

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", v1)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
