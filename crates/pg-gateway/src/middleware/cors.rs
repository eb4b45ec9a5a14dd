//! CORS middleware.
//!
//! Wrapper around tower-http CORS for browser clients calling the gateway
//! from another origin. Only mounted when `CORS_ENABLED` is set.

use axum::http::{header, HeaderName, Method};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Headers a GraphQL client is expected to send
const ALLOWED_HEADERS: [HeaderName; 4] = [
    header::ACCEPT,
    header::AUTHORIZATION,
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
];

/// Preflight cache lifetime
const MAX_AGE: Duration = Duration::from_secs(86400);

/// Create the permissive CORS layer
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers(ALLOWED_HEADERS)
        .expose_headers([header::WWW_AUTHENTICATE])
        .max_age(MAX_AGE)
}
