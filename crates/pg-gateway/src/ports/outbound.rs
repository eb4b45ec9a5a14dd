//! Outbound ports for the gateway.

use crate::domain::config::{DatabaseConfig, GatewayConfig};
use crate::domain::error::EngineError;
use crate::domain::identity::RequestContext;
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A GraphQL-over-HTTP request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    #[serde(
        default,
        rename = "operationName",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
            extensions: None,
        }
    }
}

/// Everything the engine is constructed with
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Database connection parameters
    pub database: DatabaseConfig,
    /// Schema exposed through the gateway
    pub schema: String,
    /// Detect schema changes while running
    pub watch: bool,
    /// Serve the GraphiQL console
    pub graphiql: bool,
    /// Token verification secret
    pub jwt_secret: SecretString,
    /// Required token audience
    pub jwt_audience: Option<String>,
    /// Qualified composite type describing token payloads
    pub jwt_type: String,
    /// Role for requests whose token names none
    pub default_role: String,
}

impl EngineOptions {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            database: config.database.clone(),
            schema: config.graphql.schema.clone(),
            watch: config.graphql.watch,
            graphiql: config.graphql.graphiql,
            jwt_secret: config.jwt.secret.clone(),
            jwt_audience: config.jwt.audience.clone(),
            jwt_type: config.graphql.jwt_type.clone(),
            default_role: config.graphql.default_role.clone(),
        }
    }
}

/// The delegated schema-introspection and query-execution engine.
///
/// The gateway never inspects results: whatever `execute` returns is the
/// response body, and `EngineError` renders through its own response mapping.
#[async_trait]
pub trait SchemaEngine: Send + Sync {
    /// Options the engine was constructed with
    fn options(&self) -> &EngineOptions;

    /// Warm-up after the listener is bound. Failures are reported and the
    /// call is retried; they never stop the server.
    async fn prepare(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Execute one operation on behalf of the request described by `ctx`
    async fn execute(
        &self,
        request: GraphQLRequest,
        ctx: &RequestContext<'_>,
    ) -> Result<Value, EngineError>;

    /// Release pooled resources
    async fn close(&self) {}
}
