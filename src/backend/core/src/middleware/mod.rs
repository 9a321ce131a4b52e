//! Request-gating middleware.
//!
//! Two tower layers guard the HTTP surface: [`session::SessionLayer`]
//! authenticates and authorizes requests, [`rate_limit::RateLimitLayer`]
//! enforces fixed-window request budgets. Both talk to the shared store
//! through the [`crate::store::KeyValueStore`] port.

pub mod rate_limit;
pub mod session;

pub use rate_limit::{RateLimitLayer, RateLimitPolicy};
pub use session::{CurrentUser, SessionGate, SessionLayer, SessionPolicy};

/// What a middleware does when the shared store is unreachable.
///
/// This is an explicit, per-layer decision rather than an ambient error
/// path: the session gate defaults to [`FailurePolicy::FailClosed`] (an
/// unverifiable blacklist must not admit a possibly-revoked token), the
/// rate limiter to [`FailurePolicy::FailOpen`] (a broken counter must not
/// take the API down).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Let the request through and log the store failure.
    FailOpen,
    /// Reject the request with 503 Service Unavailable.
    #[default]
    FailClosed,
}
