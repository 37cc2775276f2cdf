//! Resource envelope shared across the xDS pipeline.
//!
//! Every Envoy resource travels as a named, pre-encoded
//! `google.protobuf.Any`; the type URLs and fixed infrastructure
//! identifiers live here so translator, snapshot manager, and server
//! agree on them.

use envoy_types::pb::google::protobuf::Any;
use prost::Message;

/// Type URL for Envoy Cluster resources
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
/// Type URL for Envoy ClusterLoadAssignment resources
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
/// Type URL for Envoy Listener resources
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
/// Type URL for Envoy RouteConfiguration resources
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
/// Type URL for Envoy Secret resources
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// All type URLs a snapshot may carry, in publish order.
pub const ALL_TYPE_URLS: [&str; 5] = [
    CLUSTER_TYPE_URL,
    ENDPOINT_TYPE_URL,
    LISTENER_TYPE_URL,
    ROUTE_TYPE_URL,
    SECRET_TYPE_URL,
];

// Fixed infrastructure identifiers shared between the translator and the
// data-plane contract.
pub const POLICY_ENGINE_CLUSTER: &str = "gateplane_policy_engine";
pub const POLICY_ENGINE_SOCKET_PATH: &str = "/var/run/gateplane/policy-engine.sock";
pub const SDS_CLUSTER: &str = "gateplane_sds";
pub const OTEL_COLLECTOR_CLUSTER: &str = "gateplane_otel_collector";
pub const ACCESS_LOG_SINK_CLUSTER: &str = "gateplane_access_log_sink";
pub const DYNAMIC_FORWARD_PROXY_CLUSTER: &str = "gateplane_dynamic_forward_proxy";
pub const WEBSUB_HUB_CLUSTER: &str = "gateplane_websub_hub";

/// SDS secret carrying the combined trusted-CA bundle for upstream TLS.
pub const UPSTREAM_CA_BUNDLE_SECRET: &str = "upstream_ca_bundle";
/// SDS secret carrying the router's downstream TLS certificate.
pub const ROUTER_TLS_CERT_SECRET: &str = "router_tls_certificate";

/// Internal WebSub hub listener port.
pub const WEBSUB_INTERNAL_PORT: u32 = 9100;
/// Dynamic-forward-proxy listener ports.
pub const DYNAMIC_HTTP_PORT: u32 = 9101;
pub const DYNAMIC_HTTPS_PORT: u32 = 9102;

// Listener and route-configuration names. The HTTP and HTTPS listeners
// share one route configuration; the WebSub and dynamic listeners carry
// their own.
pub const MAIN_HTTP_LISTENER: &str = "gateplane_listener_http";
pub const MAIN_HTTPS_LISTENER: &str = "gateplane_listener_https";
pub const WEBSUB_LISTENER: &str = "gateplane_listener_websub";
pub const DYNAMIC_HTTP_LISTENER: &str = "gateplane_listener_dynamic_http";
pub const DYNAMIC_HTTPS_LISTENER: &str = "gateplane_listener_dynamic_https";
pub const MAIN_ROUTE_CONFIG: &str = "gateplane_routes";
pub const WEBSUB_ROUTE_CONFIG: &str = "gateplane_routes_websub";
pub const DYNAMIC_ROUTE_CONFIG: &str = "gateplane_routes_dynamic";

/// Filter metadata namespace carrying per-route API attributes.
pub const ROUTE_METADATA_NAMESPACE: &str = "gateplane.api";

/// A named, pre-encoded Envoy resource ready for a discovery response.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    /// Encode `message` into an `Any` under `type_url`.
    pub fn encode<M: Message>(name: impl Into<String>, type_url: &str, message: &M) -> Self {
        Self {
            name: name.into(),
            resource: Any { type_url: type_url.to_string(), value: message.encode_to_vec() },
        }
    }

    pub fn type_url(&self) -> &str {
        &self.resource.type_url
    }
}
