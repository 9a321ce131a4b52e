//! Error handling for the gate.
//!
//! This module provides:
//! - Machine-readable error codes with HTTP status mapping
//! - User-friendly messages vs detailed internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! API failures are rendered as a small JSON object `{"error": "..."}` so
//! no internal detail leaks to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

/// A specialized Result type for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication (401)
    Unauthenticated,
    TokenInvalid,
    TokenExpired,
    TokenBlacklisted,
    InvalidCredentials,

    // Authorization (403)
    Forbidden,
    EmailNotVerified,

    // Throttling (429)
    RateLimited,

    // Validation (400/404)
    ValidationError,
    MissingRequiredField,
    RecordNotFound,

    // Infrastructure
    DatabaseError,
    DatabaseConnectionFailed,
    CacheError,
    StoreUnavailable,
    SerializationError,

    // Configuration
    ConfigurationError,

    // Internal
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated
            | Self::TokenInvalid
            | Self::TokenExpired
            | Self::TokenBlacklisted
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,

            Self::Forbidden | Self::EmailNotVerified => StatusCode::FORBIDDEN,

            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,

            Self::ValidationError | Self::MissingRequiredField => StatusCode::BAD_REQUEST,

            Self::RecordNotFound => StatusCode::NOT_FOUND,

            Self::DatabaseConnectionFailed | Self::StoreUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            Self::DatabaseError
            | Self::CacheError
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error category for grouping in logs and metrics.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Unauthenticated
            | Self::TokenInvalid
            | Self::TokenExpired
            | Self::TokenBlacklisted
            | Self::InvalidCredentials => "authentication",
            Self::Forbidden | Self::EmailNotVerified => "authorization",
            Self::RateLimited => "throttling",
            Self::ValidationError | Self::MissingRequiredField | Self::RecordNotFound => {
                "validation"
            }
            Self::DatabaseError | Self::DatabaseConnectionFailed => "database",
            Self::CacheError | Self::StoreUnavailable => "store",
            Self::SerializationError => "serialization",
            Self::ConfigurationError => "configuration",
            Self::InternalError => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the gate.
///
/// Splits a user-facing message (safe to return to clients) from an
/// internal message that only reaches logs.
#[derive(Error, Debug)]
pub struct GateError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl GateError {
    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            source: None,
        }
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create an unauthenticated error (401).
    pub fn unauthenticated(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    /// Create a forbidden error (403).
    pub fn forbidden() -> Self {
        Self::new(ErrorCode::Forbidden, "Forbidden. You do not have access.")
    }

    /// Create a validation error (400).
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a not found error (404).
    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::RecordNotFound, message)
    }

    /// Create an invalid credentials error. Deliberately vague: the same
    /// message covers unknown email and wrong password.
    pub fn invalid_credentials() -> Self {
        Self::new(ErrorCode::InvalidCredentials, "invalid credentials")
    }

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Log this error with severity matching its status class.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        if status >= 500 {
            error!(
                error_code = %code,
                category = category,
                http_status = status,
                user_message = %self.user_message,
                internal_message = ?self.internal_message,
                source = ?self.source,
                "Request failed"
            );
        } else if status == 429 {
            warn!(
                error_code = %code,
                category = category,
                http_status = status,
                "Request throttled"
            );
        } else {
            debug!(
                error_code = %code,
                category = category,
                http_status = status,
                user_message = %self.user_message,
                "Request rejected"
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        self.log();

        counter!(
            "gate_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);

        let status = self.http_status();
        let body = serde_json::json!({ "error": self.user_message });

        (status, Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for GateError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (
                ErrorCode::RecordNotFound,
                "The requested record was not found",
            ),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<redis::RedisError> for GateError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::StoreUnavailable, "Unable to reach the store")
        } else if error.is_timeout() {
            (ErrorCode::CacheError, "Store operation timed out")
        } else {
            (ErrorCode::CacheError, "A store error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<jsonwebtoken::errors::Error> for GateError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        let code = match error.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => ErrorCode::TokenExpired,
            _ => ErrorCode::TokenInvalid,
        };

        Self::with_internal(code, "Invalid or expired token.", error.to_string())
            .with_source(error)
    }
}

impl From<serde_json::Error> for GateError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for GateError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error occurred",
            error.to_string(),
        )
    }
}

impl From<anyhow::Error> for GateError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<GateError>() {
            Ok(gate_error) => gate_error,
            Err(error) => Self::internal(error.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(
            ErrorCode::Unauthenticated.http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorCode::TokenBlacklisted.http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ErrorCode::Forbidden.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorCode::RateLimited.http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::StoreUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_display_includes_internal() {
        let error = GateError::with_internal(
            ErrorCode::DatabaseError,
            "A database error occurred",
            "connection refused: localhost:5432",
        );

        let display = format!("{}", error);
        assert!(display.contains("DatabaseError"));
        assert!(display.contains("connection refused"));
    }

    #[test]
    fn test_user_message_hides_internal_detail() {
        let error = GateError::with_internal(
            ErrorCode::CacheError,
            "A store error occurred",
            "redis://10.0.0.3 timed out",
        );

        assert_eq!(error.user_message(), "A store error occurred");
        assert!(!error.user_message().contains("redis"));
    }

    #[test]
    fn test_jwt_error_mapping() {
        let expired = jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::ExpiredSignature,
        );
        assert_eq!(GateError::from(expired).code(), ErrorCode::TokenExpired);

        let bad_sig = jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::InvalidSignature,
        );
        assert_eq!(GateError::from(bad_sig).code(), ErrorCode::TokenInvalid);
    }

    #[test]
    fn test_category_grouping() {
        assert_eq!(ErrorCode::TokenExpired.category(), "authentication");
        assert_eq!(ErrorCode::Forbidden.category(), "authorization");
        assert_eq!(ErrorCode::RateLimited.category(), "throttling");
        assert_eq!(ErrorCode::StoreUnavailable.category(), "store");
    }
}
