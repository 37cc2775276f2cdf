//! xDS gRPC server backed by the snapshot cache.
//!
//! One shared state-of-the-world stream loop serves ADS and the typed
//! CDS/EDS/LDS/RDS/SDS services. Each stream is a task owning its local
//! state (subscriptions, last request versions); shared state is reached
//! only through the snapshot cache and the callback tracker. Delta xDS
//! is not offered; those endpoints answer `Unimplemented`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};
use uuid::Uuid;

use envoy_types::pb::envoy::service::cluster::v3::cluster_discovery_service_server::ClusterDiscoveryService;
use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::AggregatedDiscoveryService, DeltaDiscoveryRequest,
    DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use envoy_types::pb::envoy::service::endpoint::v3::endpoint_discovery_service_server::EndpointDiscoveryService;
use envoy_types::pb::envoy::service::listener::v3::listener_discovery_service_server::ListenerDiscoveryService;
use envoy_types::pb::envoy::service::route::v3::route_discovery_service_server::RouteDiscoveryService;
use envoy_types::pb::envoy::service::secret::v3::secret_discovery_service_server::SecretDiscoveryService;

use crate::xds::cache::{Snapshot, SnapshotCache};
use crate::xds::callbacks::{StreamCallbacks, UNKNOWN_NODE_ID};
use crate::xds::resources::{
    CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, ROUTE_TYPE_URL, SECRET_TYPE_URL,
};

type ResponseStream =
    Pin<Box<dyn Stream<Item = std::result::Result<DiscoveryResponse, Status>> + Send>>;
type DeltaStream =
    Pin<Box<dyn Stream<Item = std::result::Result<DeltaDiscoveryResponse, Status>> + Send>>;

/// State shared by every discovery service registration.
#[derive(Debug)]
pub struct ServerState {
    cache: Arc<SnapshotCache>,
    callbacks: StreamCallbacks,
}

impl ServerState {
    pub fn new(cache: Arc<SnapshotCache>) -> Self {
        Self { cache, callbacks: StreamCallbacks::new() }
    }

    pub fn cache(&self) -> Arc<SnapshotCache> {
        Arc::clone(&self.cache)
    }

    pub fn callbacks(&self) -> &StreamCallbacks {
        &self.callbacks
    }
}

fn build_response(snapshot: &Snapshot, type_url: &str, names: &[String]) -> DiscoveryResponse {
    DiscoveryResponse {
        version_info: snapshot.version_info(),
        resources: snapshot
            .resources_named(type_url, names)
            .into_iter()
            .map(|built| built.resource)
            .collect(),
        type_url: type_url.to_string(),
        nonce: Uuid::new_v4().to_string(),
        ..Default::default()
    }
}

/// Run the shared SOTW stream loop for one client stream.
pub(crate) fn run_stream(
    state: Arc<ServerState>,
    mut in_stream: tonic::Streaming<DiscoveryRequest>,
    service: &'static str,
    default_type_url: Option<&'static str>,
) -> ReceiverStream<std::result::Result<DiscoveryResponse, Status>> {
    let (tx, rx) = mpsc::channel(100);
    let stream_id = state.callbacks.on_stream_open(service);

    tokio::spawn(async move {
        let mut update_rx = state.cache.subscribe();
        // Subscription set and last-seen request version per type URL:
        // local to this stream task by design.
        let mut subscriptions: HashMap<String, Vec<String>> = HashMap::new();
        let mut last_request_version: HashMap<String, String> = HashMap::new();
        let mut node_id = UNKNOWN_NODE_ID.to_string();

        loop {
            tokio::select! {
                result = in_stream.next() => {
                    match result {
                        Some(Ok(mut request)) => {
                            if request.type_url.is_empty() {
                                if let Some(type_url) = default_type_url {
                                    request.type_url = type_url.to_string();
                                }
                            }

                            state.callbacks.on_stream_request(stream_id, service, &request);
                            if let Some(recorded) = state.callbacks.node_of(stream_id) {
                                node_id = recorded;
                            }

                            subscriptions
                                .insert(request.type_url.clone(), request.resource_names.clone());
                            last_request_version
                                .insert(request.type_url.clone(), request.version_info.clone());

                            if request.error_detail.is_some() {
                                // The NACK was logged by the callbacks; hold
                                // this version until a new one is published.
                                state.callbacks.on_stream_nack(service);
                                continue;
                            }

                            let Some(snapshot) = state.cache.snapshot(&node_id) else {
                                debug!(
                                    stream_id,
                                    service,
                                    node_id = %node_id,
                                    "No snapshot published yet; deferring response"
                                );
                                continue;
                            };

                            if request.version_info == snapshot.version_info() {
                                debug!(
                                    stream_id,
                                    service,
                                    type_url = %request.type_url,
                                    version = %request.version_info,
                                    "Client is current; skipping duplicate response"
                                );
                                continue;
                            }

                            let response = build_response(
                                &snapshot,
                                &request.type_url,
                                &request.resource_names,
                            );
                            state.callbacks.on_stream_response(
                                stream_id,
                                service,
                                &request.version_info,
                                &response.version_info,
                            );
                            if tx.send(Ok(response)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(error)) => {
                            warn!(stream_id, service, error = %error, "Error receiving discovery request");
                            let _ = tx.send(Err(error)).await;
                            break;
                        }
                        None => {
                            info!(stream_id, service, "Stream ended by client");
                            break;
                        }
                    }
                }
                event = update_rx.recv() => {
                    match event {
                        Ok(event) => {
                            if event.node_id != node_id || subscriptions.is_empty() {
                                continue;
                            }
                            let Some(snapshot) = state.cache.snapshot(&node_id) else {
                                continue;
                            };

                            for (type_url, names) in &subscriptions {
                                let response = build_response(&snapshot, type_url, names);
                                let request_version = last_request_version
                                    .get(type_url)
                                    .cloned()
                                    .unwrap_or_default();
                                state.callbacks.on_stream_response(
                                    stream_id,
                                    service,
                                    &request_version,
                                    &response.version_info,
                                );
                                if tx.send(Ok(response)).await.is_err() {
                                    return state.callbacks.on_stream_closed(stream_id, service);
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(stream_id, service, skipped, "Missed snapshot notifications");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            warn!(stream_id, service, "Snapshot notification channel closed");
                            break;
                        }
                    }
                }
            }
        }

        state.callbacks.on_stream_closed(stream_id, service);
    });

    ReceiverStream::new(rx)
}

/// One-shot fetch against the current snapshot for the request's node.
fn fetch_response(
    state: &ServerState,
    request: &DiscoveryRequest,
    default_type_url: Option<&'static str>,
) -> std::result::Result<Response<DiscoveryResponse>, Status> {
    let node_id = request
        .node
        .as_ref()
        .map(|node| node.id.as_str())
        .filter(|id| !id.is_empty())
        .unwrap_or(UNKNOWN_NODE_ID);

    let type_url = if request.type_url.is_empty() {
        default_type_url.ok_or_else(|| Status::invalid_argument("type_url is required"))?
    } else {
        request.type_url.as_str()
    };

    let snapshot = state
        .cache
        .snapshot(node_id)
        .ok_or_else(|| Status::not_found(format!("no snapshot for node '{}'", node_id)))?;

    Ok(Response::new(build_response(&snapshot, type_url, &request.resource_names)))
}

fn delta_unimplemented<T>() -> std::result::Result<Response<T>, Status> {
    Err(Status::unimplemented("delta xDS is not supported; use state-of-the-world"))
}

/// Aggregated Discovery Service: all resource types over one stream.
#[derive(Debug)]
pub struct AggregatedDiscovery {
    state: Arc<ServerState>,
}

impl AggregatedDiscovery {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AggregatedDiscovery {
    type StreamAggregatedResourcesStream = ResponseStream;
    type DeltaAggregatedResourcesStream = DeltaStream;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        let stream = run_stream(self.state.clone(), request.into_inner(), "ads", None);
        Ok(Response::new(Box::pin(stream)))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        delta_unimplemented()
    }
}

/// Cluster Discovery Service.
#[derive(Debug)]
pub struct ClusterDiscovery {
    state: Arc<ServerState>,
}

impl ClusterDiscovery {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl ClusterDiscoveryService for ClusterDiscovery {
    type StreamClustersStream = ResponseStream;
    type DeltaClustersStream = DeltaStream;

    async fn stream_clusters(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamClustersStream>, Status> {
        let stream =
            run_stream(self.state.clone(), request.into_inner(), "cds", Some(CLUSTER_TYPE_URL));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn delta_clusters(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaClustersStream>, Status> {
        delta_unimplemented()
    }

    async fn fetch_clusters(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        fetch_response(&self.state, request.get_ref(), Some(CLUSTER_TYPE_URL))
    }
}

/// Endpoint Discovery Service.
#[derive(Debug)]
pub struct EndpointDiscovery {
    state: Arc<ServerState>,
}

impl EndpointDiscovery {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl EndpointDiscoveryService for EndpointDiscovery {
    type StreamEndpointsStream = ResponseStream;
    type DeltaEndpointsStream = DeltaStream;

    async fn stream_endpoints(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamEndpointsStream>, Status> {
        let stream =
            run_stream(self.state.clone(), request.into_inner(), "eds", Some(ENDPOINT_TYPE_URL));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn delta_endpoints(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaEndpointsStream>, Status> {
        delta_unimplemented()
    }

    async fn fetch_endpoints(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        fetch_response(&self.state, request.get_ref(), Some(ENDPOINT_TYPE_URL))
    }
}

/// Listener Discovery Service.
#[derive(Debug)]
pub struct ListenerDiscovery {
    state: Arc<ServerState>,
}

impl ListenerDiscovery {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl ListenerDiscoveryService for ListenerDiscovery {
    type StreamListenersStream = ResponseStream;
    type DeltaListenersStream = DeltaStream;

    async fn stream_listeners(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamListenersStream>, Status> {
        let stream =
            run_stream(self.state.clone(), request.into_inner(), "lds", Some(LISTENER_TYPE_URL));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn delta_listeners(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaListenersStream>, Status> {
        delta_unimplemented()
    }

    async fn fetch_listeners(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        fetch_response(&self.state, request.get_ref(), Some(LISTENER_TYPE_URL))
    }
}

/// Route Discovery Service.
#[derive(Debug)]
pub struct RouteDiscovery {
    state: Arc<ServerState>,
}

impl RouteDiscovery {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl RouteDiscoveryService for RouteDiscovery {
    type StreamRoutesStream = ResponseStream;
    type DeltaRoutesStream = DeltaStream;

    async fn stream_routes(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamRoutesStream>, Status> {
        let stream =
            run_stream(self.state.clone(), request.into_inner(), "rds", Some(ROUTE_TYPE_URL));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn delta_routes(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaRoutesStream>, Status> {
        delta_unimplemented()
    }

    async fn fetch_routes(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        fetch_response(&self.state, request.get_ref(), Some(ROUTE_TYPE_URL))
    }
}

/// Secret Discovery Service.
#[derive(Debug)]
pub struct SecretDiscovery {
    state: Arc<ServerState>,
}

impl SecretDiscovery {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl SecretDiscoveryService for SecretDiscovery {
    type StreamSecretsStream = ResponseStream;
    type DeltaSecretsStream = DeltaStream;

    async fn stream_secrets(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamSecretsStream>, Status> {
        let stream =
            run_stream(self.state.clone(), request.into_inner(), "sds", Some(SECRET_TYPE_URL));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn delta_secrets(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaSecretsStream>, Status> {
        delta_unimplemented()
    }

    async fn fetch_secrets(
        &self,
        request: Request<DiscoveryRequest>,
    ) -> std::result::Result<Response<DiscoveryResponse>, Status> {
        fetch_response(&self.state, request.get_ref(), Some(SECRET_TYPE_URL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::resources::BuiltResource;
    use envoy_types::pb::envoy::config::core::v3::Node;
    use envoy_types::pb::google::protobuf::Any;
    use std::collections::HashMap as StdHashMap;

    fn snapshot_with(version: u64, count: usize) -> Snapshot {
        let resources: Vec<BuiltResource> = (0..count)
            .map(|i| BuiltResource {
                name: format!("cluster-{i}"),
                resource: Any { type_url: CLUSTER_TYPE_URL.to_string(), value: vec![i as u8] },
            })
            .collect();
        Snapshot::new(version, StdHashMap::from([(CLUSTER_TYPE_URL, resources)]))
    }

    #[test]
    fn build_response_carries_version_and_resources() {
        let snapshot = snapshot_with(7, 3);
        let response = build_response(&snapshot, CLUSTER_TYPE_URL, &[]);
        assert_eq!(response.version_info, "7");
        assert_eq!(response.type_url, CLUSTER_TYPE_URL);
        assert_eq!(response.resources.len(), 3);
        assert!(!response.nonce.is_empty());
    }

    #[test]
    fn build_response_honors_resource_names() {
        let snapshot = snapshot_with(1, 3);
        let response =
            build_response(&snapshot, CLUSTER_TYPE_URL, &["cluster-1".to_string()]);
        assert_eq!(response.resources.len(), 1);
    }

    #[test]
    fn nonces_are_unique_per_response() {
        let snapshot = snapshot_with(1, 0);
        let a = build_response(&snapshot, CLUSTER_TYPE_URL, &[]);
        let b = build_response(&snapshot, CLUSTER_TYPE_URL, &[]);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn fetch_requires_a_published_snapshot() {
        let state = ServerState::new(Arc::new(SnapshotCache::new()));
        let request = DiscoveryRequest {
            node: Some(Node { id: "router-node".into(), ..Default::default() }),
            ..Default::default()
        };
        let status = fetch_response(&state, &request, Some(CLUSTER_TYPE_URL)).unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[test]
    fn fetch_serves_the_current_snapshot() {
        let cache = Arc::new(SnapshotCache::new());
        cache.set_snapshot("router-node", snapshot_with(4, 2)).unwrap();
        let state = ServerState::new(cache);

        let request = DiscoveryRequest {
            node: Some(Node { id: "router-node".into(), ..Default::default() }),
            ..Default::default()
        };
        let response =
            fetch_response(&state, &request, Some(CLUSTER_TYPE_URL)).unwrap().into_inner();
        assert_eq!(response.version_info, "4");
        assert_eq!(response.resources.len(), 2);
    }

    #[tokio::test]
    async fn delta_endpoints_answer_unimplemented() {
        let status = match delta_unimplemented::<DeltaStream>() {
            Ok(_) => panic!("expected Err"),
            Err(status) => status,
        };
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }
}
