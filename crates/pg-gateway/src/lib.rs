#![allow(missing_docs)]

//! pg-gateway - GraphQL over PostgreSQL with per-request identity propagation.
//!
//! The gateway listens on HTTP, verifies bearer tokens, and hands each GraphQL
//! operation to a schema engine together with the caller's identity. The
//! engine runs the operation in a transaction whose role and `jwt.claims.*`
//! settings come from that identity, so row-level security sees the caller.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         pg-gateway                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │   POST /graphql     GET /graphiql     GET /health             │
//! │         │                                                     │
//! │  ┌──────┴─────────────────────────────────────────┐           │
//! │  │ Tracing → CORS → BodyLimit → JwtAuth           │           │
//! │  └──────┬─────────────────────────────────────────┘           │
//! │         │  RequestContext (identity, headers)                 │
//! │  ┌──────┴─────────────────────────────────────────┐           │
//! │  │ SchemaEngine (port)                            │           │
//! │  │   PgGraphqlEngine: role + claims → graphql.resolve         │
//! │  └──────┬─────────────────────────────────────────┘           │
//! └─────────┼────────────────────────────────────────────────────┘
//!           │
//!       PostgreSQL (pg_graphql)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pg_gateway::{GatewayConfig, SessionIdentityExtractor};
//! use std::sync::Arc;
//!
//! let config = GatewayConfig::resolve()?;
//! let handle = pg_gateway::start(config, Arc::new(SessionIdentityExtractor::new())).await?;
//! // ...
//! handle.stop().await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod middleware;
pub mod ports;
pub mod router;
pub mod service;

pub use adapters::PgGraphqlEngine;
pub use domain::{
    ApiError, ClaimsMapping, ConfigError, EngineError, GatewayConfig, GatewayError, Identity,
    IdentityExtractor, RequestContext, SessionIdentityExtractor, StaticClaimsExtractor, UserId,
};
pub use ports::{EngineOptions, GraphQLRequest, SchemaEngine};
pub use router::build_router;
pub use service::{start, start_with_engine, stop, GatewayServer, ServerHandle, ServerState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
