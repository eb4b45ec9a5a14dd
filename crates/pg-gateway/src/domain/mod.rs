//! Domain types for the gateway.
//!
//! Configuration, errors, and the request identity model.

pub mod config;
pub mod error;
pub mod identity;

pub use config::{DatabaseConfig, GatewayConfig, GraphqlConfig, HttpConfig, JwtConfig};
pub use error::{ApiError, ApiResult, ConfigError, EngineError, GatewayError};
pub use identity::{
    AuthenticatedUser, ClaimsMapping, Identity, IdentityExtractor, RequestContext,
    SessionIdentityExtractor, StaticClaimsExtractor, TokenClaims, UserId,
};
