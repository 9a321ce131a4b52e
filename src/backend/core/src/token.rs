//! JWT issuance and verification.
//!
//! Two token kinds share one HS256 secret: short-lived access tokens carry
//! the subject id and role; longer-lived refresh tokens carry only the
//! subject id. Verification is a pure check with no store or database
//! access.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Default access token lifetime: one hour.
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 3600;

/// Default refresh token lifetime: one day.
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 86_400;

/// User role. One role per user; the admin bypass in the ownership gate is
/// an equality check against `Role::Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Staff,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Staff => "staff",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "staff" => Ok(Role::Staff),
            other => Err(GateError::validation(format!("unknown role: {other}"))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: user id
    pub sub: i64,
    /// User role at issuance time
    pub role: Role,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

/// Claims carried by a refresh token. Role is intentionally absent: the
/// role is re-read from the database on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject: user id
    pub sub: i64,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

/// Signs and verifies both token kinds.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenCodec {
    /// Create a codec with the default lifetimes (1 h access, 1 d refresh).
    pub fn new(secret: &str) -> Self {
        Self::with_ttls(secret, DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS)
    }

    pub fn with_ttls(secret: &str, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    /// Issue an access token for the given user.
    pub fn sign_access(&self, user_id: i64, role: Role) -> Result<String, GateError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: user_id,
            role,
            iat: now,
            exp: now + self.access_ttl_secs as i64,
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Issue a refresh token for the given user.
    pub fn sign_refresh(&self, user_id: i64) -> Result<String, GateError> {
        let now = Utc::now().timestamp();
        let claims = RefreshClaims {
            sub: user_id,
            iat: now,
            exp: now + self.refresh_ttl_secs as i64,
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Verify an access token and return its claims.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, GateError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation())?;
        Ok(data.claims)
    }

    /// Verify a refresh token and return its claims.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, GateError> {
        let data = decode::<RefreshClaims>(token, &self.decoding_key, &self.validation())?;
        Ok(data.claims)
    }

    pub const fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    pub const fn refresh_ttl_secs(&self) -> u64 {
        self.refresh_ttl_secs
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        // No leeway: a token expired by one second is expired.
        validation.leeway = 0;
        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn codec() -> TokenCodec {
        TokenCodec::new("test-secret")
    }

    #[test]
    fn test_access_round_trip() {
        let codec = codec();
        let token = codec.sign_access(42, Role::Manager).unwrap();
        let claims = codec.verify_access(&token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.role, Role::Manager);
        assert!(claims.exp - claims.iat == DEFAULT_ACCESS_TTL_SECS as i64);
    }

    #[test]
    fn test_refresh_round_trip() {
        let codec = codec();
        let token = codec.sign_refresh(7).unwrap();
        let claims = codec.verify_refresh(&token).unwrap();
        assert_eq!(claims.sub, 7);
        assert!(claims.exp - claims.iat == DEFAULT_REFRESH_TTL_SECS as i64);
    }

    #[test]
    fn test_verify_is_idempotent() {
        let codec = codec();
        let token = codec.sign_access(1, Role::Staff).unwrap();
        let first = codec.verify_access(&token).unwrap();
        let second = codec.verify_access(&token).unwrap();
        assert_eq!(first.sub, second.sub);
        assert_eq!(first.exp, second.exp);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = codec().sign_access(1, Role::Staff).unwrap();
        let other = TokenCodec::new("different-secret");
        let err = other.verify_access(&token).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenInvalid);
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = TokenCodec::with_ttls("test-secret", 0, 0);
        let token = codec.sign_access(1, Role::Admin).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let err = codec.verify_access(&token).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenExpired);
    }

    #[test]
    fn test_garbage_token_rejected() {
        let err = codec().verify_access("not-a-jwt").unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenInvalid);
    }

    #[test]
    fn test_role_serde_is_lowercase() {
        let json = serde_json::to_string(&Role::Admin).unwrap();
        assert_eq!(json, "\"admin\"");
        let role: Role = serde_json::from_str("\"staff\"").unwrap();
        assert_eq!(role, Role::Staff);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("manager".parse::<Role>().unwrap(), Role::Manager);
        assert!("superuser".parse::<Role>().is_err());
    }
}
