//! Middleware stack for the gateway.
//!
//! Layer order: Request → Tracing → CORS → BodyLimit → JwtAuth (GraphQL route only) → Handler

pub mod auth;
pub mod cors;
pub mod tracing;

pub use auth::{AuthError, JwtAuthLayer, JwtVerifier};
pub use cors::create_cors_layer;
pub use self::tracing::TracingLayer;

use crate::domain::config::HttpConfig;
use crate::ports::EngineOptions;
use axum::extract::DefaultBodyLimit;
use tower_http::cors::CorsLayer;

/// Middleware stack builder
pub struct MiddlewareStack {
    pub tracing: TracingLayer,
    pub cors: Option<CorsLayer>,
    pub body_limit: DefaultBodyLimit,
    pub auth: JwtAuthLayer,
}

impl MiddlewareStack {
    /// Create middleware stack from listener config and engine options
    pub fn from_config(http: &HttpConfig, engine: &EngineOptions) -> Self {
        Self {
            tracing: TracingLayer::new(),
            cors: http.cors_enabled.then(create_cors_layer),
            body_limit: DefaultBodyLimit::max(http.body_limit),
            auth: JwtAuthLayer::new(JwtVerifier::new(
                &engine.jwt_secret,
                engine.jwt_audience.as_deref(),
            )),
        }
    }
}
