//! # Eventgate Core
//!
//! Session, authorization and rate-limit gate for the WellMesh
//! event-management API.
//!
//! ## Architecture
//!
//! - **Token Codec**: HS256 access/refresh token issuance and verification
//! - **Store Port**: pluggable key-value store (Redis in production,
//!   in-memory for tests and single-node deployments)
//! - **Session Middleware**: bearer-token gate with blacklist, role and
//!   ownership checks
//! - **Rate-Limit Middleware**: fixed-window limiter over atomic store
//!   increments
//! - **Session Lifecycle**: login, refresh, logout and email verification
//!   backed by PostgreSQL

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod store;
pub mod telemetry;
pub mod token;

pub use error::{ErrorCode, GateError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::auth::{AuthSessions, TokenPair};
    pub use crate::db::Database;
    pub use crate::error::{ErrorCode, GateError, Result};
    pub use crate::middleware::{
        CurrentUser, FailurePolicy, RateLimitLayer, RateLimitPolicy, SessionGate, SessionLayer,
        SessionPolicy,
    };
    pub use crate::store::{KeyValueStore, MemoryStore, RedisStore, TokenBlacklist};
    pub use crate::token::{AccessClaims, RefreshClaims, Role, TokenCodec};
}
