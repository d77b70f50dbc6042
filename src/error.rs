/// Error Handling Module
///
/// Unified error handling for the token realm. It covers:
/// 1. Domain-specific error types (auth, cache, configuration)
/// 2. The central `AppError` used for control flow
/// 3. HTTP response mapping with structured logging
/// 4. Error context enrichment for server-side observability

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Authentication failures
///
/// Every variant is terminal for the current request. Callers see a uniform
/// "unauthenticated" outcome; the variant itself is only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Token is not three well-formed segments, or payload cannot be parsed
    MalformedToken,
    /// Signature does not match the one recomputed with the secret
    SignatureInvalid,
    /// Token is past its embedded expiry
    Expired,
    /// `userId` claim is absent or blank
    UserIdMissing,
    /// No session record cached for the user (revoked or expired)
    RefreshTokenMissing,
    /// Cached session was minted at a different `createTime`
    RefreshMismatch,
    /// Session store could not be consulted
    CacheUnavailable,
}

impl AuthError {
    /// Stable identifier used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MalformedToken => "malformed_token",
            AuthError::SignatureInvalid => "signature_invalid",
            AuthError::Expired => "expired",
            AuthError::UserIdMissing => "user_id_missing",
            AuthError::RefreshTokenMissing => "refresh_token_missing",
            AuthError::RefreshMismatch => "refresh_mismatch",
            AuthError::CacheUnavailable => "cache_unavailable",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MalformedToken => write!(f, "Malformed token"),
            AuthError::SignatureInvalid => write!(f, "Token signature is invalid"),
            AuthError::Expired => write!(f, "Token has expired"),
            AuthError::UserIdMissing => write!(f, "User id in token is empty"),
            AuthError::RefreshTokenMissing => write!(f, "No active session for user"),
            AuthError::RefreshMismatch => write!(f, "Token does not belong to the active session"),
            AuthError::CacheUnavailable => write!(f, "Session store unavailable"),
        }
    }
}

impl StdError for AuthError {}

/// Cache backend errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Transport, pool or timeout failure
    Unavailable(String),
    /// Counter delta must be strictly positive
    InvalidDelta(i64),
    /// Key holds a different structure than the operation expects
    WrongType(String),
    /// Any other error reported by the backend
    Command(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Unavailable(msg) => write!(f, "Cache unavailable: {}", msg),
            CacheError::InvalidDelta(delta) => {
                write!(f, "Counter delta must be greater than 0 (got {})", delta)
            }
            CacheError::WrongType(key) => write!(f, "Key {} holds the wrong kind of value", key),
            CacheError::Command(msg) => write!(f, "Cache command failed: {}", msg),
        }
    }
}

impl StdError for CacheError {}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            CacheError::Unavailable(err.to_string())
        } else if err.code() == Some("WRONGTYPE") {
            CacheError::WrongType(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
    ParseError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Config parse error: {}", msg),
        }
    }
}

impl StdError for ConfigError {}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

/// Central error type that all application errors map to
#[derive(Debug)]
pub enum AppError {
    Auth(AuthError),
    Cache(CacheError),
    Config(ConfigError),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Cache(e) => write!(f, "{}", e),
            AppError::Config(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

// ============================================================================
// FROM IMPLEMENTATIONS
// ============================================================================

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::Cache(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(ConfigError::ParseError(err.to_string()))
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    /// HTTP status code
    pub status: u16,
    /// Timestamp when error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let (status, code, message) = match self {
            // Authentication kinds are never leaked to the caller
            AppError::Auth(_) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED".to_string(),
                "Unauthenticated".to_string(),
            ),

            AppError::Cache(CacheError::InvalidDelta(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR".to_string(),
                "Internal server error".to_string(),
            ),
            AppError::Cache(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE".to_string(),
                "Session store temporarily unavailable".to_string(),
            ),

            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR".to_string(),
                "Server configuration error".to_string(),
            ),

            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR".to_string(),
                "Internal server error".to_string(),
            ),
        };

        let error_response = ErrorResponse::new(
            request_id.to_string(),
            message,
            code,
            status.as_u16(),
        );

        (status, error_response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Auth(e) => {
                tracing::warn!(
                    request_id = request_id,
                    kind = e.kind(),
                    error = %e,
                    "Authentication rejected"
                );
            }
            AppError::Cache(CacheError::InvalidDelta(delta)) => {
                tracing::error!(
                    request_id = request_id,
                    delta = delta,
                    "Counter called with non-positive delta"
                );
            }
            AppError::Cache(e) => {
                tracing::error!(
                    request_id = request_id,
                    error = %e,
                    "Cache error"
                );
            }
            AppError::Config(e) => {
                tracing::error!(
                    request_id = request_id,
                    error = %e,
                    "Configuration error"
                );
            }
            AppError::Internal(msg) => {
                tracing::error!(
                    request_id = request_id,
                    error = %msg,
                    "Internal error"
                );
            }
        }
    }
}

/// The single 401 body every authentication failure produces
pub fn unauthenticated_response() -> HttpResponse {
    HttpResponse::Unauthorized().json(serde_json::json!({
        "error": "Unauthenticated",
        "code": "UNAUTHENTICATED"
    }))
}

/// Implement ResponseError for Actix-web integration
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        if let AppError::Auth(_) = self {
            return unauthenticated_response();
        }

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Cache(CacheError::InvalidDelta(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Cache(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// 4. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Error context for enhanced logging and debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn log_error(&self, error: &AppError) {
        let context = serde_json::json!({
            "request_id": self.request_id,
            "operation": self.operation,
            "user_id": self.user_id,
            "timestamp": self.timestamp.to_rfc3339(),
        });

        match error {
            AppError::Auth(e) => {
                tracing::warn!(
                    kind = e.kind(),
                    context = ?context,
                    "Authentication error"
                );
            }
            _ => {
                tracing::error!(
                    error = %error,
                    context = ?context,
                    "Operation failed"
                );
            }
        }
    }
}
