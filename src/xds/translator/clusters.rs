//! Cluster construction: per-upstream clusters plus the fixed
//! infrastructure clusters (policy engine, OTEL collector, access-log
//! sink, dynamic forward proxy, SDS).

use envoy_types::pb::envoy::config::cluster::v3::{cluster, Cluster};
use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address, Address, Http2ProtocolOptions, Pipe,
    SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::extensions::clusters::dynamic_forward_proxy::v3::{
    cluster_config, ClusterConfig as DfpClusterConfig,
};
use envoy_types::pb::envoy::extensions::common::dynamic_forward_proxy::v3::DnsCacheConfig;
use envoy_types::pb::envoy::extensions::upstreams::http::v3::{
    http_protocol_options, HttpProtocolOptions,
};
use envoy_types::pb::google::protobuf::{Any, Duration as ProtoDuration, UInt32Value};
use prost::Message;

use crate::config::{PolicyEngineMode, RouterConfig, XdsConfig};
use crate::errors::Result;
use crate::xds::resources::{
    DYNAMIC_FORWARD_PROXY_CLUSTER, POLICY_ENGINE_CLUSTER, POLICY_ENGINE_SOCKET_PATH, SDS_CLUSTER,
};
use crate::xds::translator::tls;
use crate::xds::upstream::ResolvedUpstream;

const HTTP_PROTOCOL_OPTIONS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
const DFP_CLUSTER_CONFIG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.clusters.dynamic_forward_proxy.v3.ClusterConfig";
const DNS_CACHE_NAME: &str = "dynamic_forward_proxy_cache";

const DEFAULT_CONNECT_TIMEOUT_SECS: i64 = 5;

/// Build a cluster for one resolved upstream. HTTPS upstreams get a TLS
/// transport socket; validation runs against the published CA bundle
/// when one exists.
pub fn upstream_cluster(resolved: &ResolvedUpstream, ca_bundle_available: bool) -> Cluster {
    let lb_endpoints: Vec<LbEndpoint> = resolved
        .endpoints
        .iter()
        .map(|endpoint| {
            let port = endpoint.url.port_or_known_default().unwrap_or(80);
            let host = endpoint.url.host_str().unwrap_or_default();
            let mut lb_endpoint = socket_lb_endpoint(host, port.into());
            lb_endpoint.load_balancing_weight =
                endpoint.weight.map(|weight| UInt32Value { value: weight });
            lb_endpoint
        })
        .collect();

    let mut cluster = Cluster {
        name: resolved.cluster_name.clone(),
        connect_timeout: Some(ProtoDuration { seconds: DEFAULT_CONNECT_TIMEOUT_SECS, nanos: 0 }),
        cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(
            cluster::DiscoveryType::StrictDns as i32,
        )),
        lb_policy: cluster::LbPolicy::RoundRobin as i32,
        load_assignment: Some(ClusterLoadAssignment {
            cluster_name: resolved.cluster_name.clone(),
            endpoints: vec![LocalityLbEndpoints { lb_endpoints, ..Default::default() }],
            ..Default::default()
        }),
        ..Default::default()
    };

    if resolved.url.scheme() == "https" {
        let sni = resolved.url.host_str().unwrap_or_default();
        cluster.transport_socket = Some(tls::upstream_transport_socket(sni, ca_bundle_available));
    }

    cluster
}

/// Load assignment mirrored into the EDS resource set for a cluster.
pub fn load_assignment_of(cluster: &Cluster) -> Option<ClusterLoadAssignment> {
    cluster.load_assignment.clone()
}

/// Cluster for the Policy Engine ext_proc service: a Unix domain socket
/// next to the router in uds mode, STRICT_DNS to `host:port` in tcp
/// mode. Always speaks HTTP/2 (gRPC); tcp mode may add mTLS.
pub fn policy_engine_cluster(router: &RouterConfig) -> Result<Cluster> {
    let engine = &router.policy_engine;

    let mut cluster = match engine.mode {
        PolicyEngineMode::Uds => Cluster {
            name: POLICY_ENGINE_CLUSTER.to_string(),
            connect_timeout: Some(ProtoDuration { seconds: 1, nanos: 0 }),
            cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(
                cluster::DiscoveryType::Static as i32,
            )),
            load_assignment: Some(ClusterLoadAssignment {
                cluster_name: POLICY_ENGINE_CLUSTER.to_string(),
                endpoints: vec![LocalityLbEndpoints {
                    lb_endpoints: vec![pipe_lb_endpoint(POLICY_ENGINE_SOCKET_PATH)],
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        },
        PolicyEngineMode::Tcp => Cluster {
            name: POLICY_ENGINE_CLUSTER.to_string(),
            connect_timeout: Some(ProtoDuration { seconds: 1, nanos: 0 }),
            cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(
                cluster::DiscoveryType::StrictDns as i32,
            )),
            load_assignment: Some(ClusterLoadAssignment {
                cluster_name: POLICY_ENGINE_CLUSTER.to_string(),
                endpoints: vec![LocalityLbEndpoints {
                    lb_endpoints: vec![socket_lb_endpoint(&engine.host, engine.port.into())],
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        },
    };

    cluster
        .typed_extension_protocol_options
        .insert(HTTP_PROTOCOL_OPTIONS_TYPE_URL.to_string(), http2_protocol_options());

    if engine.mode == PolicyEngineMode::Tcp && engine.tls.enabled {
        cluster.transport_socket = Some(tls::mutual_tls_transport_socket(
            &engine.tls.cert_path,
            &engine.tls.key_path,
            &engine.tls.ca_path,
            &engine.tls.server_name,
            engine.tls.skip_verify,
        )?);
    }

    Ok(cluster)
}

/// Cluster towards the OTEL collector, used by the HCM tracing provider.
pub fn otel_collector_cluster(name: &str, endpoint: &str) -> Result<Cluster> {
    let (host, port) = split_host_port(endpoint)?;
    Ok(grpc_cluster(name, &host, port))
}

/// Cluster towards the analytics gRPC access-log sink.
pub fn access_log_sink_cluster(name: &str, host: &str, port: u16) -> Cluster {
    grpc_cluster(name, host, port.into())
}

/// Cluster towards the in-process SDS/xDS server.
pub fn sds_cluster(xds: &XdsConfig) -> Cluster {
    // Envoy cannot dial a wildcard bind address; fall back to loopback.
    let host = if xds.bind_address == "0.0.0.0" || xds.bind_address == "::" {
        "127.0.0.1"
    } else {
        xds.bind_address.as_str()
    };
    grpc_cluster(SDS_CLUSTER, host, xds.port.into())
}

/// Dynamic-forward-proxy cluster shared by the dynamic listeners.
pub fn dynamic_forward_proxy_cluster() -> Cluster {
    let dfp_config = DfpClusterConfig {
        cluster_implementation_specifier: Some(
            cluster_config::ClusterImplementationSpecifier::DnsCacheConfig(dns_cache_config()),
        ),
        ..Default::default()
    };

    Cluster {
        name: DYNAMIC_FORWARD_PROXY_CLUSTER.to_string(),
        connect_timeout: Some(ProtoDuration { seconds: DEFAULT_CONNECT_TIMEOUT_SECS, nanos: 0 }),
        lb_policy: cluster::LbPolicy::ClusterProvided as i32,
        cluster_discovery_type: Some(cluster::ClusterDiscoveryType::ClusterType(
            cluster::CustomClusterType {
                name: "envoy.clusters.dynamic_forward_proxy".to_string(),
                typed_config: Some(Any {
                    type_url: DFP_CLUSTER_CONFIG_TYPE_URL.to_string(),
                    value: dfp_config.encode_to_vec(),
                }),
            },
        )),
        ..Default::default()
    }
}

/// DNS cache shared between the dynamic-forward-proxy HTTP filter and
/// cluster; both sides must agree on the name.
pub fn dns_cache_config() -> DnsCacheConfig {
    DnsCacheConfig {
        name: DNS_CACHE_NAME.to_string(),
        dns_lookup_family: cluster::DnsLookupFamily::V4Only as i32,
        ..Default::default()
    }
}

fn grpc_cluster(name: &str, host: &str, port: u32) -> Cluster {
    let mut cluster = Cluster {
        name: name.to_string(),
        connect_timeout: Some(ProtoDuration { seconds: 1, nanos: 0 }),
        cluster_discovery_type: Some(cluster::ClusterDiscoveryType::Type(
            cluster::DiscoveryType::StrictDns as i32,
        )),
        load_assignment: Some(ClusterLoadAssignment {
            cluster_name: name.to_string(),
            endpoints: vec![LocalityLbEndpoints {
                lb_endpoints: vec![socket_lb_endpoint(host, port)],
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    };

    cluster
        .typed_extension_protocol_options
        .insert(HTTP_PROTOCOL_OPTIONS_TYPE_URL.to_string(), http2_protocol_options());

    cluster
}

fn http2_protocol_options() -> Any {
    let options = HttpProtocolOptions {
        upstream_protocol_options: Some(
            http_protocol_options::UpstreamProtocolOptions::ExplicitHttpConfig(
                http_protocol_options::ExplicitHttpConfig {
                    protocol_config: Some(
                        http_protocol_options::explicit_http_config::ProtocolConfig::Http2ProtocolOptions(
                            Http2ProtocolOptions::default(),
                        ),
                    ),
                },
            ),
        ),
        ..Default::default()
    };

    Any { type_url: HTTP_PROTOCOL_OPTIONS_TYPE_URL.to_string(), value: options.encode_to_vec() }
}

fn socket_lb_endpoint(host: &str, port: u32) -> LbEndpoint {
    LbEndpoint {
        host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
            address: Some(Address {
                address: Some(AddressType::SocketAddress(SocketAddress {
                    address: host.to_string(),
                    port_specifier: Some(socket_address::PortSpecifier::PortValue(port)),
                    ..Default::default()
                })),
            }),
            ..Default::default()
        })),
        ..Default::default()
    }
}

fn pipe_lb_endpoint(path: &str) -> LbEndpoint {
    LbEndpoint {
        host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
            address: Some(Address {
                address: Some(AddressType::Pipe(Pipe { path: path.to_string(), mode: 0 })),
            }),
            ..Default::default()
        })),
        ..Default::default()
    }
}

fn split_host_port(endpoint: &str) -> Result<(String, u32)> {
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(|| {
        crate::Error::config(format!("endpoint '{}' must be host:port", endpoint))
    })?;
    let port: u32 = port
        .parse()
        .map_err(|_| crate::Error::config(format!("invalid port in endpoint '{}'", endpoint)))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::upstream::resolve_inline;

    #[test]
    fn upstream_cluster_carries_endpoint_and_timeout() {
        let resolved = resolve_inline("http://backend:8080").unwrap();
        let cluster = upstream_cluster(&resolved, false);

        assert_eq!(cluster.name, "cluster_http_backend_8080");
        assert_eq!(cluster.connect_timeout.as_ref().unwrap().seconds, 5);
        assert!(cluster.transport_socket.is_none());

        let assignment = cluster.load_assignment.unwrap();
        let endpoint = &assignment.endpoints[0].lb_endpoints[0];
        match endpoint.host_identifier.as_ref().unwrap() {
            lb_endpoint::HostIdentifier::Endpoint(endpoint) => {
                match endpoint.address.as_ref().unwrap().address.as_ref().unwrap() {
                    AddressType::SocketAddress(socket) => {
                        assert_eq!(socket.address, "backend");
                        assert_eq!(
                            socket.port_specifier,
                            Some(socket_address::PortSpecifier::PortValue(8080))
                        );
                    }
                    other => panic!("expected socket address, got {:?}", other),
                }
            }
            other => panic!("expected endpoint, got {:?}", other),
        }
    }

    #[test]
    fn https_upstream_gets_tls_transport_socket() {
        let resolved = resolve_inline("https://secure.example.com").unwrap();
        let cluster = upstream_cluster(&resolved, true);
        assert!(cluster.transport_socket.is_some());

        // Default https port is used for the endpoint even though the
        // cluster name carries no explicit port.
        assert_eq!(cluster.name, "cluster_https_secure_example_com");
        let assignment = cluster.load_assignment.unwrap();
        let endpoint = &assignment.endpoints[0].lb_endpoints[0];
        if let Some(lb_endpoint::HostIdentifier::Endpoint(endpoint)) = &endpoint.host_identifier {
            if let Some(AddressType::SocketAddress(socket)) =
                &endpoint.address.as_ref().unwrap().address
            {
                assert_eq!(
                    socket.port_specifier,
                    Some(socket_address::PortSpecifier::PortValue(443))
                );
            }
        }
    }

    #[test]
    fn weighted_endpoints_survive_cluster_building() {
        use crate::model::{UpstreamDefinition, UpstreamTimeout, WeightedUrl};
        use std::collections::BTreeMap;

        let mut defs = BTreeMap::new();
        defs.insert(
            "pool".to_string(),
            UpstreamDefinition {
                urls: vec![
                    WeightedUrl { url: "http://a:8080".into(), weight: Some(70) },
                    WeightedUrl { url: "http://b:8080".into(), weight: Some(30) },
                ],
                timeout: Some(UpstreamTimeout { request: Some("10s".into()) }),
            },
        );
        let resolved = crate::xds::upstream::resolve_ref("pool", &defs).unwrap();
        let cluster = upstream_cluster(&resolved, false);

        let assignment = cluster.load_assignment.unwrap();
        let lb_endpoints = &assignment.endpoints[0].lb_endpoints;
        assert_eq!(lb_endpoints.len(), 2);
        assert_eq!(lb_endpoints[0].load_balancing_weight, Some(UInt32Value { value: 70 }));
        assert_eq!(lb_endpoints[1].load_balancing_weight, Some(UInt32Value { value: 30 }));
    }

    #[test]
    fn uds_policy_engine_cluster_uses_pipe() {
        let router = RouterConfig::default();
        let cluster = policy_engine_cluster(&router).unwrap();
        assert_eq!(cluster.name, POLICY_ENGINE_CLUSTER);

        let assignment = cluster.load_assignment.unwrap();
        let endpoint = &assignment.endpoints[0].lb_endpoints[0];
        if let Some(lb_endpoint::HostIdentifier::Endpoint(endpoint)) = &endpoint.host_identifier {
            match endpoint.address.as_ref().unwrap().address.as_ref().unwrap() {
                AddressType::Pipe(pipe) => assert_eq!(pipe.path, POLICY_ENGINE_SOCKET_PATH),
                other => panic!("expected pipe address, got {:?}", other),
            }
        }
        assert!(cluster
            .typed_extension_protocol_options
            .contains_key(HTTP_PROTOCOL_OPTIONS_TYPE_URL));
    }

    #[test]
    fn tcp_policy_engine_cluster_uses_strict_dns() {
        let mut router = RouterConfig::default();
        router.policy_engine.mode = PolicyEngineMode::Tcp;
        router.policy_engine.host = "policy-engine".to_string();
        router.policy_engine.port = 9002;

        let cluster = policy_engine_cluster(&router).unwrap();
        assert_eq!(
            cluster.cluster_discovery_type,
            Some(cluster::ClusterDiscoveryType::Type(cluster::DiscoveryType::StrictDns as i32))
        );
        assert!(cluster.transport_socket.is_none());
    }

    #[test]
    fn tcp_policy_engine_with_mtls_gets_transport_socket() {
        let mut router = RouterConfig::default();
        router.policy_engine.mode = PolicyEngineMode::Tcp;
        router.policy_engine.tls.enabled = true;
        router.policy_engine.tls.cert_path = "/certs/client.crt".into();
        router.policy_engine.tls.key_path = "/certs/client.key".into();
        router.policy_engine.tls.ca_path = "/certs/ca.crt".into();
        router.policy_engine.tls.server_name = "policy-engine".into();

        let cluster = policy_engine_cluster(&router).unwrap();
        assert!(cluster.transport_socket.is_some());
    }

    #[test]
    fn sds_cluster_avoids_wildcard_bind() {
        let cluster = sds_cluster(&XdsConfig::default());
        let assignment = cluster.load_assignment.unwrap();
        let endpoint = &assignment.endpoints[0].lb_endpoints[0];
        if let Some(lb_endpoint::HostIdentifier::Endpoint(endpoint)) = &endpoint.host_identifier {
            if let Some(AddressType::SocketAddress(socket)) =
                &endpoint.address.as_ref().unwrap().address
            {
                assert_eq!(socket.address, "127.0.0.1");
            }
        }
    }

    #[test]
    fn dynamic_forward_proxy_cluster_is_cluster_provided() {
        let cluster = dynamic_forward_proxy_cluster();
        assert_eq!(cluster.lb_policy, cluster::LbPolicy::ClusterProvided as i32);
        match cluster.cluster_discovery_type.unwrap() {
            cluster::ClusterDiscoveryType::ClusterType(custom) => {
                assert_eq!(custom.name, "envoy.clusters.dynamic_forward_proxy");
                let decoded =
                    DfpClusterConfig::decode(&custom.typed_config.unwrap().value[..]).unwrap();
                match decoded.cluster_implementation_specifier.unwrap() {
                    cluster_config::ClusterImplementationSpecifier::DnsCacheConfig(cache) => {
                        assert_eq!(cache.name, DNS_CACHE_NAME);
                    }
                    other => panic!("expected dns cache config, got {:?}", other),
                }
            }
            other => panic!("expected custom cluster type, got {:?}", other),
        }
    }

    #[test]
    fn otel_cluster_parses_endpoint() {
        let cluster =
            otel_collector_cluster(crate::xds::resources::OTEL_COLLECTOR_CLUSTER, "otel:4317")
                .unwrap();
        assert_eq!(cluster.name, crate::xds::resources::OTEL_COLLECTOR_CLUSTER);
        assert!(otel_collector_cluster("x", "no-port").is_err());
    }
}
