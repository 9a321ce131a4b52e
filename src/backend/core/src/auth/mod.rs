//! Session lifecycle: login, refresh, logout, email verification.
//!
//! Issues the token pair the middleware later verifies. Refresh tokens are
//! persisted so logout can revoke them; access tokens are stateless and
//! revoked through the blacklist instead.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use chrono::Utc;
use metrics::counter;
use tracing::{debug, info};

use crate::db::{Database, UserRow};
use crate::error::{ErrorCode, GateError};
use crate::store::{KeyValueStore, TokenBlacklist};
use crate::token::{Role, TokenCodec};

const VERIFY_PREFIX: &str = "verify:";

/// The pair issued at login.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Session lifecycle operations.
#[derive(Clone)]
pub struct AuthSessions {
    db: Database,
    codec: TokenCodec,
    blacklist: TokenBlacklist,
    store: Arc<dyn KeyValueStore>,
}

impl AuthSessions {
    pub fn new(
        db: Database,
        codec: TokenCodec,
        blacklist: TokenBlacklist,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            db,
            codec,
            blacklist,
            store,
        }
    }

    /// Verify credentials and issue a token pair. The refresh token is
    /// persisted so it can be revoked at logout.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, GateError> {
        let user = self
            .db
            .find_user_by_email(email)
            .await?
            .filter(|u| !u.is_deleted)
            .ok_or_else(GateError::invalid_credentials)?;

        verify_password(&user, password)?;

        if !user.is_verified {
            return Err(GateError::new(
                ErrorCode::EmailNotVerified,
                "Please verify your email before logging in.",
            ));
        }

        let role = Role::from_str(&user.role)?;
        let access_token = self.codec.sign_access(user.id, role)?;
        let refresh_token = self.codec.sign_refresh(user.id)?;

        let expires_at =
            Utc::now() + chrono::Duration::seconds(self.codec.refresh_ttl_secs() as i64);
        self.db
            .insert_refresh_token(&refresh_token, user.id, expires_at)
            .await?;

        counter!("auth_logins_total").increment(1);
        info!(user_id = user.id, "user logged in");

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Exchange a valid, persisted refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, GateError> {
        // The row check comes first: a token that was never issued (or was
        // revoked by logout) is rejected even if its signature verifies.
        let row = self
            .db
            .find_refresh_token(refresh_token)
            .await?
            .ok_or_else(|| {
                GateError::unauthenticated("Invalid refresh token.")
            })?;

        if row.expires_at < Utc::now() {
            self.db.delete_refresh_token(refresh_token).await?;
            return Err(GateError::unauthenticated("Invalid refresh token."));
        }

        let claims = self.codec.verify_refresh(refresh_token).map_err(|e| {
            debug!(error = %e, "refresh token failed verification");
            GateError::unauthenticated("Invalid refresh token.")
        })?;

        let user = self
            .db
            .find_user_by_id(claims.sub)
            .await?
            .filter(|u| !u.is_deleted)
            .ok_or_else(|| GateError::unauthenticated("Invalid refresh token."))?;

        let role = Role::from_str(&user.role)?;
        let access_token = self.codec.sign_access(user.id, role)?;

        counter!("auth_refreshes_total").increment(1);
        Ok(access_token)
    }

    /// Revoke a session: blacklist the access token for the remainder of
    /// its lifetime and delete the refresh token row.
    pub async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), GateError> {
        let row = self
            .db
            .find_refresh_token(refresh_token)
            .await?
            .ok_or_else(|| GateError::unauthenticated("Invalid refresh token."))?;

        self.blacklist.revoke(access_token).await?;
        self.db.delete_refresh_token(refresh_token).await?;

        counter!("auth_logouts_total").increment(1);
        info!(user_id = row.user_id, "user logged out");
        Ok(())
    }

    /// Consume an email verification token and mark the user verified.
    pub async fn verify_email(&self, token: &str) -> Result<(), GateError> {
        let key = format!("{VERIFY_PREFIX}{token}");
        let user_id = self
            .store
            .get(&key)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| {
                GateError::new(ErrorCode::TokenInvalid, "Invalid or expired token.")
            })?;

        self.db.mark_user_verified(user_id).await?;
        self.store.delete(&key).await?;

        info!(user_id, "email verified");
        Ok(())
    }

    /// Stage a verification token for a user (issued out-of-band by the
    /// mailer; stored here so `verify_email` can consume it).
    pub async fn stage_verification_token(
        &self,
        token: &str,
        user_id: i64,
        ttl: Duration,
    ) -> Result<(), GateError> {
        let key = format!("{VERIFY_PREFIX}{token}");
        self.store.set_ex(&key, &user_id.to_string(), ttl).await
    }
}

fn verify_password(user: &UserRow, password: &str) -> Result<(), GateError> {
    let parsed = PasswordHash::new(&user.password_hash)
        .map_err(|e| GateError::internal(format!("corrupt password hash: {e}")))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| GateError::invalid_credentials())
}
