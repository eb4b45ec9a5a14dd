//! Adapters for the gateway.
//!
//! Infrastructure implementations of the outbound ports.

pub mod error_conversions;
pub mod jwt_signing;
pub mod pg_graphql;
pub mod schema_watch;

pub use jwt_signing::{JwtSigner, JwtTargets};
pub use pg_graphql::{session_settings, PgGraphqlEngine, SessionSettings};
pub use schema_watch::{install_fixtures, SchemaWatcher, WATCH_CHANNEL};
