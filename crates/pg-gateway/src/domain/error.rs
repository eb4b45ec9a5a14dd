//! Gateway error types and the GraphQL error body they render to.
//!
//! Startup failures (`ConfigError`, `GatewayError::Bind`) are fatal. Request
//! failures render as `{"errors":[{"message":..,"extensions":{"code":..}}]}`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

/// Machine-readable codes carried in `extensions.code`
pub mod codes {
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const ENGINE_UNAVAILABLE: &str = "ENGINE_UNAVAILABLE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

/// A request-level error rendered as a GraphQL error response
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status of the response
    pub status: StatusCode,
    /// Value of `extensions.code`
    pub code: &'static str,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// Malformed GraphQL request body
    pub fn bad_request(details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, details)
    }

    /// Missing, malformed or rejected bearer token
    pub fn unauthenticated(details: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, codes::UNAUTHENTICATED, details)
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, what)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            codes::PAYLOAD_TOO_LARGE,
            format!("request body exceeds {} bytes", limit),
        )
    }

    /// The database rejected the statement
    pub fn database(details: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, codes::DATABASE_ERROR, details)
    }

    /// The engine could not reach the database
    pub fn unavailable(details: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::ENGINE_UNAVAILABLE,
            details,
        )
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::INTERNAL_ERROR,
            details,
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ApiError", 2)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("extensions", &serde_json::json!({ "code": self.code }))?;
        state.end()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let unauthenticated = status == StatusCode::UNAUTHORIZED;
        let mut response = (status, Json(serde_json::json!({ "errors": [self] }))).into_response();
        if unauthenticated {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Result type for request handling
pub type ApiResult<T> = Result<T, ApiError>;

/// Configuration resolution failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A required variable is set to an empty string
    #[error("environment variable {0} must not be empty")]
    Empty(&'static str),

    /// A variable is set but cannot be parsed
    #[error("environment variable {var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Failures raised by the delegated schema engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The operation document or its variables are unusable
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The database could not be reached
    #[error("database unavailable: {0}")]
    Unavailable(String),

    /// The database rejected a statement
    #[error("database error: {0}")]
    Database(String),

    /// A JWT result could not be signed
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidOperation(msg) => ApiError::bad_request(msg),
            EngineError::Unavailable(msg) => ApiError::unavailable(msg),
            EngineError::Database(msg) => ApiError::database(msg),
            EngineError::Signing(msg) => ApiError::internal(msg),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

/// Gateway-level errors (startup and lifecycle)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop terminated with an I/O error
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = ApiError::bad_request("missing query");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["message"], "missing query");
        assert_eq!(json["extensions"]["code"], codes::BAD_REQUEST);
    }

    #[test]
    fn test_unauthenticated_response_has_challenge() {
        let response = ApiError::unauthenticated("bad token").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[test]
    fn test_engine_error_mapping() {
        let api: ApiError = EngineError::Unavailable("refused".into()).into();
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);

        let api: ApiError = EngineError::InvalidOperation("no query".into()).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);

        let api: ApiError = EngineError::Database("permission denied".into()).into();
        assert_eq!(api.code, codes::DATABASE_ERROR);

        let api: ApiError = EngineError::Signing("bad key".into()).into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Missing("JWT_SECRET");
        assert!(err.to_string().contains("JWT_SECRET"));

        let gateway: GatewayError = err.into();
        assert!(matches!(gateway, GatewayError::Config(_)));
    }
}
