//! Gateway server lifecycle.
//!
//! `Unstarted → Starting → Serving → Stopped`, strictly linear. One listener
//! per server; a failed bind is fatal and never retried.

use crate::adapters::PgGraphqlEngine;
use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::domain::identity::IdentityExtractor;
use crate::ports::{EngineOptions, SchemaEngine};
use crate::router::build_router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Lifecycle state of a gateway server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unstarted,
    Starting,
    Serving,
    Stopped,
}

/// Delay between engine preparation attempts while the database is down
pub const DEFAULT_PREPARE_RETRY: Duration = Duration::from_secs(5);

/// A configured, not yet started gateway
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    state: watch::Sender<ServerState>,
    prepare_retry: Duration,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        let (state, _) = watch::channel(ServerState::Unstarted);
        Self {
            config: Arc::new(config),
            state,
            prepare_retry: DEFAULT_PREPARE_RETRY,
        }
    }

    /// Override the delay between engine preparation attempts
    pub fn with_prepare_retry(mut self, delay: Duration) -> Self {
        self.prepare_retry = delay;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Construct the pg_graphql engine with `extractor` as its settings hook
    /// and start serving it.
    pub async fn start(
        self,
        extractor: Arc<dyn IdentityExtractor>,
    ) -> Result<ServerHandle, GatewayError> {
        let options = EngineOptions::from_config(&self.config);
        let engine = Arc::new(PgGraphqlEngine::new(options, extractor));
        self.start_with_engine(engine).await
    }

    /// Bind the listener and serve `engine`.
    pub async fn start_with_engine(
        self,
        engine: Arc<dyn SchemaEngine>,
    ) -> Result<ServerHandle, GatewayError> {
        self.state.send_replace(ServerState::Starting);

        let addr = self.config.http_addr();
        let listener = match bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state.send_replace(ServerState::Stopped);
                engine.close().await;
                return Err(e);
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|source| GatewayError::Bind { addr, source })?;

        let router = build_router(&self.config.http, Arc::clone(&engine));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        });

        self.state.send_replace(ServerState::Serving);
        info!(
            addr = %local_addr,
            schema = %engine.options().schema,
            graphiql = engine.options().graphiql,
            "Gateway is up"
        );

        let warmup = tokio::spawn(prepare_until_ready(
            Arc::clone(&engine),
            self.prepare_retry,
        ));

        Ok(ServerHandle {
            local_addr,
            engine,
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
            warmup,
            state: self.state,
            shutdown_timeout: self.config.http.shutdown_timeout,
        })
    }
}

/// Prepare the engine, retrying until it succeeds or the server stops.
async fn prepare_until_ready(engine: Arc<dyn SchemaEngine>, retry: Duration) {
    let mut attempt: u32 = 1;
    loop {
        match engine.prepare().await {
            Ok(()) => return,
            Err(e) => {
                warn!(
                    error = %e,
                    attempt,
                    retry_secs = retry.as_secs_f64(),
                    "Schema engine preparation failed; retrying"
                );
            }
        }
        tokio::time::sleep(retry).await;
        attempt = attempt.saturating_add(1);
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, GatewayError> {
    TcpListener::bind(addr).await.map_err(|source| {
        error!(addr = %addr, error = %source, "Failed to bind listener");
        GatewayError::Bind { addr, source }
    })
}

/// A running gateway. Dropping the handle triggers shutdown.
pub struct ServerHandle {
    local_addr: SocketAddr,
    engine: Arc<dyn SchemaEngine>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<std::io::Result<()>>>,
    warmup: JoinHandle<()>,
    state: watch::Sender<ServerState>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Stop accepting, drain in-flight requests (bounded by the shutdown
    /// timeout) and release the listener.
    pub async fn stop(mut self) -> Result<(), GatewayError> {
        info!(addr = %self.local_addr, "Stopping gateway");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.warmup.abort();

        let result = match self.server.take() {
            Some(mut server) => {
                match tokio::time::timeout(self.shutdown_timeout, &mut server).await {
                    Ok(Ok(served)) => served.map_err(GatewayError::Serve),
                    Ok(Err(join)) => Err(GatewayError::Serve(std::io::Error::other(join))),
                    Err(_) => {
                        warn!(
                            timeout_secs = self.shutdown_timeout.as_secs(),
                            "Graceful shutdown timed out; dropping connections"
                        );
                        server.abort();
                        let _ = server.await;
                        Ok(())
                    }
                }
            }
            None => Ok(()),
        };

        self.engine.close().await;
        self.state.send_replace(ServerState::Stopped);
        info!("Gateway stopped");
        result
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.warmup.abort();
    }
}

/// Start a gateway serving the pg_graphql engine
pub async fn start(
    config: GatewayConfig,
    extractor: Arc<dyn IdentityExtractor>,
) -> Result<ServerHandle, GatewayError> {
    GatewayServer::new(config).start(extractor).await
}

/// Start a gateway serving any engine
pub async fn start_with_engine(
    config: GatewayConfig,
    engine: Arc<dyn SchemaEngine>,
) -> Result<ServerHandle, GatewayError> {
    GatewayServer::new(config).start_with_engine(engine).await
}

/// Stop a running gateway
pub async fn stop(handle: ServerHandle) -> Result<(), GatewayError> {
    handle.stop().await
}
