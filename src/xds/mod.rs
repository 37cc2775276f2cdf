//! Envoy xDS (eXtended Discovery Service) implementation
//!
//! Provides the translation pipeline from stored configurations to Envoy
//! resources and a gRPC server implementing Envoy's discovery protocols:
//! - ADS (Aggregated Discovery Service)
//! - CDS / EDS / LDS / RDS / SDS typed services backed by the same state

pub mod cache;
pub mod callbacks;
pub mod resources;
pub mod route_sort;
pub mod secret;
pub mod server;
pub mod snapshot;
pub mod translator;
pub mod upstream;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Server;
use tracing::info;

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryServiceServer;
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryServiceServer;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryServiceServer;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryServiceServer;
use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryServiceServer;

use crate::config::XdsConfig;
use crate::Result;

pub use cache::{Snapshot, SnapshotCache, SnapshotEvent};
pub use secret::SdsSecretManager;
pub use server::ServerState;
pub use snapshot::{SnapshotManager, StatusCallback};
pub use translator::{ResourceBundle, TranslateOutput, Translator};

/// Server ping cadence towards idle Envoy streams.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// How long a ping may go unanswered before the stream is torn down.
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Start the xDS gRPC server and block until the shutdown signal fires.
/// Graceful shutdown drains in-flight streams.
pub async fn start_xds_server<F>(
    config: &XdsConfig,
    cache: Arc<SnapshotCache>,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config
        .bind_address()
        .parse()
        .map_err(|e| crate::Error::config(format!("Invalid xDS address: {}", e)))?;

    let state = Arc::new(ServerState::new(cache));

    info!(address = %addr, node_id = %config.node_id, "Starting Envoy xDS server");

    let server = Server::builder()
        .http2_keepalive_interval(Some(KEEPALIVE_INTERVAL))
        .http2_keepalive_timeout(Some(KEEPALIVE_TIMEOUT))
        .tcp_keepalive(Some(KEEPALIVE_INTERVAL))
        .add_service(AggregatedDiscoveryServiceServer::new(server::AggregatedDiscovery::new(
            state.clone(),
        )))
        .add_service(ClusterDiscoveryServiceServer::new(server::ClusterDiscovery::new(
            state.clone(),
        )))
        .add_service(EndpointDiscoveryServiceServer::new(server::EndpointDiscovery::new(
            state.clone(),
        )))
        .add_service(ListenerDiscoveryServiceServer::new(server::ListenerDiscovery::new(
            state.clone(),
        )))
        .add_service(RouteDiscoveryServiceServer::new(server::RouteDiscovery::new(state.clone())))
        .add_service(SecretDiscoveryServiceServer::new(server::SecretDiscovery::new(state)))
        .serve_with_shutdown(addr, shutdown_signal);

    server.await.map_err(|e| {
        let message = e.to_string();
        if message.contains("Address already in use") || message.contains("bind") {
            crate::Error::transport(format!(
                "xDS server failed to bind to {}: port {} is already in use",
                addr,
                addr.port()
            ))
        } else {
            crate::Error::transport(format!("xDS server failed: {}", e))
        }
    })?;

    info!("xDS server stopped");
    Ok(())
}
