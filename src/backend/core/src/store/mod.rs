//! Key-value store port.
//!
//! Everything stateful the gate needs from its shared store goes through
//! [`KeyValueStore`]: blacklist entries, rate-limit counters, email
//! verification keys. Production uses [`RedisStore`]; tests and single-node
//! deployments use [`MemoryStore`].

use std::time::Duration;

use async_trait::async_trait;

use crate::error::GateError;

mod blacklist;
mod memory;
mod redis;

pub use blacklist::TokenBlacklist;
pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Abstraction over the shared key-value store.
///
/// Object-safe so handlers and middleware hold an `Arc<dyn KeyValueStore>`
/// and never know which backend is wired in.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key. `Ok(None)` on miss or expired entry.
    async fn get(&self, key: &str) -> Result<Option<String>, GateError>;

    /// Set a value with a time-to-live.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), GateError>;

    /// Atomically increment a counter and return the new value.
    ///
    /// The TTL is applied only when the increment creates the key, so a
    /// fixed window opened by the first request keeps its original expiry
    /// no matter how many increments follow.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, GateError>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), GateError>;

    /// Delete all keys matching a glob-style pattern (`*` wildcard).
    /// Returns the number of keys removed.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, GateError>;

    /// Whether a key exists (and has not expired).
    async fn exists(&self, key: &str) -> Result<bool, GateError>;
}
