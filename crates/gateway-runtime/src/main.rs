//! # pg-gateway runtime
//!
//! Process entry point for the gateway.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`RUST_LOG` / `LOG_LEVEL`, `LOG_JSON`)
//! 2. Load `.env` and resolve configuration; exit 1 on failure
//! 3. Bind the listener and start serving; exit 1 on bind failure
//! 4. Wait for SIGINT or SIGTERM, then stop gracefully; exit 0

mod telemetry;

use pg_gateway::{GatewayConfig, SessionIdentityExtractor};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use crate::telemetry::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_logging(&LogConfig::from_env()) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    info!(version = pg_gateway::VERSION, "Starting pg-gateway");

    let config = match GatewayConfig::resolve() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let handle = match pg_gateway::start(config, Arc::new(SessionIdentityExtractor::new())).await
    {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Gateway failed to start");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = shutdown_signal().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    match handle.stop().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Gateway did not stop cleanly");
            ExitCode::FAILURE
        }
    }
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received");
    Ok(())
}
