//! # Gateway Lifecycle Tests
//!
//! Start, serve, conflict and stop against real sockets.
//!
//! ## Test Categories
//!
//! 1. **Configuration** - env resolution feeding the server
//! 2. **Bind** - a second server on a taken port fails, the first keeps serving
//! 3. **Stop** - health answers while serving, connections refused afterwards
//! 4. **Warm-up** - engine preparation is retried until the database is back

use async_trait::async_trait;
use pg_gateway::domain::config::vars;
use pg_gateway::{
    ConfigError, EngineError, EngineOptions, GatewayConfig, GatewayError, GatewayServer,
    GraphQLRequest, RequestContext, SchemaEngine, ServerState, SessionIdentityExtractor,
};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// TEST HELPERS
// =============================================================================

fn env() -> HashMap<&'static str, String> {
    [
        (vars::HOST, "127.0.0.1"),
        (vars::PORT, "4000"),
        (vars::DB_USER, "app"),
        (vars::DB_PASSWORD, "app-password"),
        (vars::DB_HOST, "127.0.0.1"),
        // Nothing listens here; the pool is lazy and preparation only warns
        (vars::DB_PORT, "1"),
        (vars::DB_NAME, "forum"),
        (vars::DB_ACQUIRE_TIMEOUT_SECS, "1"),
        (vars::SCHEMA, "forum_example"),
        (vars::JWT_SECRET, "integration-secret"),
        (vars::DEFAULT_ROLE, "forum_example_anonymous"),
        (vars::WATCH, "false"),
        (vars::SHUTDOWN_TIMEOUT_SECS, "2"),
    ]
    .into_iter()
    .map(|(k, v)| (k, v.to_string()))
    .collect()
}

fn resolve(env: &HashMap<&'static str, String>) -> Result<GatewayConfig, ConfigError> {
    GatewayConfig::from_lookup(|key| env.get(key).cloned())
}

/// Config bound to an ephemeral port
fn ephemeral_config() -> GatewayConfig {
    let mut config = resolve(&env()).unwrap();
    config.http.port = 0;
    config
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

async fn health(client: &reqwest::Client, addr: SocketAddr) -> reqwest::Result<reqwest::Response> {
    client.get(format!("http://{}/health", addr)).send().await
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[test]
fn test_config_from_env() {
    let config = resolve(&env()).unwrap();
    assert_eq!(config.http.port, 4000);
    assert_eq!(config.database.name, "forum");
    assert_eq!(config.graphql.schema, "forum_example");
    assert_eq!(config.graphql.jwt_type, "forum_example.jwt_token");
    assert!(!config.graphql.watch);
}

#[test]
fn test_missing_variable_fails() {
    let mut incomplete = env();
    incomplete.remove(vars::JWT_SECRET);
    assert_eq!(
        resolve(&incomplete).unwrap_err(),
        ConfigError::Missing(vars::JWT_SECRET)
    );
}

// =============================================================================
// BIND
// =============================================================================

#[tokio::test]
async fn test_second_server_on_same_port_fails() {
    let first = GatewayServer::new(ephemeral_config())
        .start(Arc::new(SessionIdentityExtractor::new()))
        .await
        .unwrap();
    let addr = first.local_addr();

    let mut taken = ephemeral_config();
    taken.http.port = addr.port();
    let second = GatewayServer::new(taken);
    assert_eq!(second.state(), ServerState::Unstarted);

    let err = second
        .start(Arc::new(SessionIdentityExtractor::new()))
        .await
        .err()
        .expect("bind should fail");
    assert!(matches!(err, GatewayError::Bind { addr: a, .. } if a.port() == addr.port()));

    let client = client();
    let response = health(&client, addr).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(first.state(), ServerState::Serving);

    first.stop().await.unwrap();
}

// =============================================================================
// STOP
// =============================================================================

#[tokio::test]
async fn test_health_then_refused_after_stop() {
    let handle = pg_gateway::start(
        ephemeral_config(),
        Arc::new(SessionIdentityExtractor::new()),
    )
    .await
    .unwrap();
    let addr = handle.local_addr();
    let states = handle.subscribe();
    assert_eq!(*states.borrow(), ServerState::Serving);

    let client = client();
    let response = tokio::time::timeout(Duration::from_secs(5), health(&client, addr))
        .await
        .expect("health answered in time")
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    pg_gateway::stop(handle).await.unwrap();
    assert_eq!(*states.borrow(), ServerState::Stopped);

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_unknown_route_is_graphql_error() {
    let handle = pg_gateway::start(
        ephemeral_config(),
        Arc::new(SessionIdentityExtractor::new()),
    )
    .await
    .unwrap();

    let response = client()
        .get(format!("http://{}/nope", handle.local_addr()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["errors"][0]["extensions"]["code"], "NOT_FOUND");

    handle.stop().await.unwrap();
}

// =============================================================================
// WARM-UP
// =============================================================================

/// Engine whose database comes up after a few failed preparations
struct FlakyEngine {
    options: EngineOptions,
    failures: u32,
    attempts: AtomicU32,
}

#[async_trait]
impl SchemaEngine for FlakyEngine {
    fn options(&self) -> &EngineOptions {
        &self.options
    }

    async fn prepare(&self) -> Result<(), EngineError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(EngineError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn execute(
        &self,
        _request: GraphQLRequest,
        _ctx: &RequestContext<'_>,
    ) -> Result<Value, EngineError> {
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn test_prepare_retried_until_database_is_up() {
    let config = ephemeral_config();
    let engine = Arc::new(FlakyEngine {
        options: EngineOptions::from_config(&config),
        failures: 2,
        attempts: AtomicU32::new(0),
    });

    let handle = GatewayServer::new(config)
        .with_prepare_retry(Duration::from_millis(10))
        .start_with_engine(engine.clone())
        .await
        .unwrap();

    let ready = tokio::time::timeout(Duration::from_secs(5), async {
        while engine.attempts.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(ready.is_ok(), "preparation was not retried");

    // Succeeded on the third attempt; no further calls
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.attempts.load(Ordering::SeqCst), 3);

    handle.stop().await.unwrap();
}
