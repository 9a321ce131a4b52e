//! Revoked-token blacklist over the key-value port.

use std::sync::Arc;
use std::time::Duration;

use crate::error::GateError;

use super::KeyValueStore;

const BLACKLIST_PREFIX: &str = "blacklist:";

/// Default blacklist entry lifetime. Matches the access token lifetime, so
/// an entry never outlives the token it revokes.
pub const DEFAULT_BLACKLIST_TTL_SECS: u64 = 3600;

/// Records revoked access tokens until their natural expiry.
#[derive(Clone)]
pub struct TokenBlacklist {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl TokenBlacklist {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(store, Duration::from_secs(DEFAULT_BLACKLIST_TTL_SECS))
    }

    pub fn with_ttl(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Mark a token revoked.
    pub async fn revoke(&self, token: &str) -> Result<(), GateError> {
        let key = format!("{BLACKLIST_PREFIX}{token}");
        self.store.set_ex(&key, "true", self.ttl).await
    }

    /// Whether a token has been revoked. A miss (absent or expired entry)
    /// means not revoked.
    pub async fn is_blacklisted(&self, token: &str) -> Result<bool, GateError> {
        let key = format!("{BLACKLIST_PREFIX}{token}");
        Ok(self.store.get(&key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_revoke_then_check() {
        let blacklist = TokenBlacklist::new(Arc::new(MemoryStore::new()));
        assert!(!blacklist.is_blacklisted("tok").await.unwrap());

        blacklist.revoke("tok").await.unwrap();
        assert!(blacklist.is_blacklisted("tok").await.unwrap());
        assert!(!blacklist.is_blacklisted("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_expires() {
        let blacklist =
            TokenBlacklist::with_ttl(Arc::new(MemoryStore::new()), Duration::from_millis(20));
        blacklist.revoke("tok").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blacklist.is_blacklisted("tok").await.unwrap());
    }
}
