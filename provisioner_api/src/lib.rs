// Provisioner API Server Library
//
// Wires the Docker driver, the preset registry and the lifecycle manager
// behind the HTTP API, and tears every live instance down on shutdown.

pub mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};

use container_driver::DockerDriver;
use preset_registry::PresetRegistry;
use provisioner_core::api::{ApiServer, ApiState};
use provisioner_core::LifecycleManager;

pub use config::{Cli, ConfigError, ServerConfig};

/// Run the server until SIGINT or SIGTERM.
pub async fn run(cli: Cli) -> Result<()> {
    let config = ServerConfig::resolve(&cli)?;
    observability::init_tracing(config.tracing_config()?);

    let driver = DockerDriver::connect(config.driver_config())
        .await
        .context("container runtime is not reachable")?;

    let registry = Arc::new(PresetRegistry::builtin());
    info!(presets = registry.kinds().len(), "Preset registry loaded");

    let lifecycle = Arc::new(
        LifecycleManager::new(Arc::new(driver), registry).with_config(config.lifecycle_config()),
    );

    let server = ApiServer::new(config.api_config(), ApiState::from_shared(lifecycle.clone()));
    let cancelling = lifecycle.clone();
    server
        .serve_with_shutdown(async move {
            shutdown_signal().await;
            cancelling.begin_shutdown();
        })
        .await
        .context("API server failed")?;

    let stopped = lifecycle.shutdown().await;
    info!(stopped, "Provisioner stopped");
    Ok(())
}

/// Wait for shutdown signal (CTRL+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
