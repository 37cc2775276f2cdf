use std::sync::Arc;
use std::time::Duration;

use gateplane::config::GateplaneConfig;
use gateplane::observability::init_metrics;
use gateplane::storage::{InMemoryConfigStore, StaticCertStore};
use gateplane::xds::{start_xds_server, SnapshotCache, SnapshotManager};
use gateplane::{Result, APP_NAME, VERSION};
use tracing::{error, info, warn};

/// Give the first translation this long before serving whatever the
/// cache holds.
const INITIAL_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateplane=info,tonic=info".into()),
        )
        .init();

    info!(app_name = APP_NAME, version = VERSION, "Starting Gateplane control plane");

    let config_path = std::env::args().nth(1);
    let config = GateplaneConfig::load(config_path.as_deref())?;
    info!(
        xds_port = config.xds.port,
        xds_bind_address = %config.xds.bind_address,
        node_id = %config.xds.node_id,
        "Loaded configuration"
    );

    if config.metrics.enabled {
        let listen = config.metrics.listen_address().parse().map_err(|e| {
            gateplane::Error::config(format!("Invalid metrics listen address: {}", e))
        })?;
        init_metrics(listen)?;
    }

    let store = Arc::new(InMemoryConfigStore::new());
    let cert_store = Arc::new(StaticCertStore::empty());
    let cache = Arc::new(SnapshotCache::new());
    let manager = Arc::new(SnapshotManager::new(
        config.clone(),
        store.clone(),
        cert_store,
        cache.clone(),
    ));

    match tokio::time::timeout(INITIAL_SNAPSHOT_TIMEOUT, manager.update_snapshot("startup")).await
    {
        Ok(Ok(version)) => info!(version, "Initial snapshot published"),
        Ok(Err(e)) => warn!(error = %e, "Initial snapshot failed; serving previous cache state"),
        Err(_) => warn!(
            timeout_secs = INITIAL_SNAPSHOT_TIMEOUT.as_secs(),
            "Initial snapshot timed out; starting with partial state"
        ),
    }

    let shutdown_signal = async {
        shutdown_requested().await;
        info!("Shutdown signal received");
    };

    if let Err(e) = start_xds_server(&config.xds, cache, shutdown_signal).await {
        error!("Failed to run xDS server: {}", e);
        std::process::exit(1);
    }

    info!("xDS server shutdown completed");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_requested() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("Failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
