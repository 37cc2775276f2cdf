//! Listener assembly.
//!
//! One HTTP connection manager shape is shared by every listener: routes
//! via RDS over ADS, a router filter at the tail, and conditionally an
//! ext_proc filter towards the Policy Engine, access logs, and OTEL
//! tracing. The listeners differ in port, transport socket, and route
//! configuration name.

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, config_source::ConfigSourceSpecifier, grpc_service,
    Address, AggregatedConfigSource, ConfigSource, GrpcService, SocketAddress,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter::ConfigType as FilterConfigType, Filter, FilterChain, Listener,
};
use envoy_types::pb::envoy::config::trace::v3::{
    tracing::{http::ConfigType as TracingConfigType, Http as HttpTracing},
    OpenTelemetryConfig,
};
use envoy_types::pb::envoy::extensions::filters::http::dynamic_forward_proxy::v3::{
    filter_config::ImplementationSpecifier, FilterConfig as DfpFilterConfig,
};
use envoy_types::pb::envoy::extensions::filters::http::ext_proc::v3::{
    ExternalProcessor, ProcessingMode,
};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router as RouterFilter;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier, ServerHeaderTransformation as HcmServerHeaderTransformation, Tracing as HcmTracing},
    http_filter::ConfigType as HttpFilterConfigType,
    HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::r#type::v3::Percent;
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, Duration as ProtoDuration};
use prost::Message;

use crate::config::{RouteCacheAction, RouterConfig, ServerHeaderTransformation};
use crate::errors::Result;
use crate::xds::resources::{
    DYNAMIC_HTTPS_LISTENER, DYNAMIC_HTTPS_PORT, DYNAMIC_HTTP_LISTENER, DYNAMIC_HTTP_PORT,
    DYNAMIC_ROUTE_CONFIG, MAIN_HTTPS_LISTENER, MAIN_HTTP_LISTENER, MAIN_ROUTE_CONFIG,
    OTEL_COLLECTOR_CLUSTER, POLICY_ENGINE_CLUSTER, WEBSUB_INTERNAL_PORT, WEBSUB_LISTENER,
    WEBSUB_ROUTE_CONFIG,
};
use crate::xds::translator::{access_log, clusters, routes::EXT_PROC_FILTER_NAME, tls};

const HCM_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
const ROUTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
const EXT_PROC_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.ext_proc.v3.ExternalProcessor";
const DFP_FILTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.dynamic_forward_proxy.v3.FilterConfig";
const OTEL_TYPE_URL: &str = "type.googleapis.com/envoy.config.trace.v3.OpenTelemetryConfig";

/// Build the full listener set for the router configuration.
pub fn build_listeners(router: &RouterConfig) -> Result<Vec<Listener>> {
    let mut listeners = Vec::new();

    listeners.push(http_listener(
        MAIN_HTTP_LISTENER,
        router.listener_port.into(),
        MAIN_ROUTE_CONFIG,
        router,
        ListenerFlavor::Main,
    )?);

    if router.https_enabled {
        let mut https = http_listener(
            MAIN_HTTPS_LISTENER,
            (router.listener_port + 1).into(),
            MAIN_ROUTE_CONFIG,
            router,
            ListenerFlavor::Main,
        )?;
        attach_downstream_tls(&mut https, router)?;
        listeners.push(https);
    }

    if router.event_gateway.enabled {
        listeners.push(http_listener(
            WEBSUB_LISTENER,
            WEBSUB_INTERNAL_PORT,
            WEBSUB_ROUTE_CONFIG,
            router,
            ListenerFlavor::Main,
        )?);

        listeners.push(http_listener(
            DYNAMIC_HTTP_LISTENER,
            DYNAMIC_HTTP_PORT,
            DYNAMIC_ROUTE_CONFIG,
            router,
            ListenerFlavor::DynamicForwardProxy,
        )?);

        if router.https_enabled {
            let mut dynamic_https = http_listener(
                DYNAMIC_HTTPS_LISTENER,
                DYNAMIC_HTTPS_PORT,
                DYNAMIC_ROUTE_CONFIG,
                router,
                ListenerFlavor::DynamicForwardProxy,
            )?;
            attach_downstream_tls(&mut dynamic_https, router)?;
            listeners.push(dynamic_https);
        }
    }

    Ok(listeners)
}

/// Which extra HTTP filters a listener carries besides ext_proc + router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerFlavor {
    Main,
    DynamicForwardProxy,
}

fn http_listener(
    name: &str,
    port: u32,
    route_config_name: &str,
    router: &RouterConfig,
    flavor: ListenerFlavor,
) -> Result<Listener> {
    let hcm = connection_manager(route_config_name, router, flavor)?;

    let filter_chain = FilterChain {
        filters: vec![Filter {
            name: "envoy.filters.network.http_connection_manager".to_string(),
            config_type: Some(FilterConfigType::TypedConfig(EnvoyAny {
                type_url: HCM_TYPE_URL.to_string(),
                value: hcm.encode_to_vec(),
            })),
        }],
        ..Default::default()
    };

    Ok(Listener {
        name: name.to_string(),
        address: Some(Address {
            address: Some(AddressType::SocketAddress(SocketAddress {
                address: "0.0.0.0".to_string(),
                port_specifier: Some(
                    envoy_types::pb::envoy::config::core::v3::socket_address::PortSpecifier::PortValue(
                        port,
                    ),
                ),
                ..Default::default()
            })),
        }),
        filter_chains: vec![filter_chain],
        ..Default::default()
    })
}

fn attach_downstream_tls(listener: &mut Listener, router: &RouterConfig) -> Result<()> {
    let socket = tls::downstream_transport_socket(&router.tls)?;
    for chain in &mut listener.filter_chains {
        chain.transport_socket = Some(socket.clone());
    }
    Ok(())
}

fn connection_manager(
    route_config_name: &str,
    router: &RouterConfig,
    flavor: ListenerFlavor,
) -> Result<HttpConnectionManager> {
    let mut http_filters = Vec::new();

    if flavor == ListenerFlavor::DynamicForwardProxy {
        http_filters.push(dynamic_forward_proxy_filter());
    }

    if router.policy_engine.enabled {
        http_filters.push(ext_proc_filter(router));
    }

    // The router filter terminates the chain.
    http_filters.push(HttpFilter {
        name: "envoy.filters.http.router".to_string(),
        config_type: Some(HttpFilterConfigType::TypedConfig(EnvoyAny {
            type_url: ROUTER_TYPE_URL.to_string(),
            value: RouterFilter::default().encode_to_vec(),
        })),
        ..Default::default()
    });

    Ok(HttpConnectionManager {
        stat_prefix: "ingress_http".to_string(),
        codec_type: CodecType::Auto as i32,
        server_header_transformation: server_header_transformation(router) as i32,
        route_specifier: Some(RouteSpecifier::Rds(Rds {
            route_config_name: route_config_name.to_string(),
            config_source: Some(ConfigSource {
                config_source_specifier: Some(ConfigSourceSpecifier::Ads(
                    AggregatedConfigSource::default(),
                )),
                ..Default::default()
            }),
        })),
        http_filters,
        access_log: access_log::build_access_logs(router)?,
        tracing: tracing_config(router),
        ..Default::default()
    })
}

fn server_header_transformation(router: &RouterConfig) -> HcmServerHeaderTransformation {
    match router.server_header_transformation {
        ServerHeaderTransformation::AppendIfAbsent => {
            HcmServerHeaderTransformation::AppendIfAbsent
        }
        ServerHeaderTransformation::Overwrite => HcmServerHeaderTransformation::Overwrite,
        ServerHeaderTransformation::PassThrough => HcmServerHeaderTransformation::PassThrough,
    }
}

fn ext_proc_filter(router: &RouterConfig) -> HttpFilter {
    let engine = &router.policy_engine;

    let processor = ExternalProcessor {
        grpc_service: Some(GrpcService {
            target_specifier: Some(grpc_service::TargetSpecifier::EnvoyGrpc(
                grpc_service::EnvoyGrpc {
                    cluster_name: POLICY_ENGINE_CLUSTER.to_string(),
                    ..Default::default()
                },
            )),
            timeout: Some(millis_to_duration(engine.timeout_ms)),
            ..Default::default()
        }),
        failure_mode_allow: false,
        message_timeout: Some(millis_to_duration(engine.message_timeout_ms)),
        processing_mode: Some(ProcessingMode {
            request_header_mode: parse_header_send_mode(&engine.request_header_mode),
            response_header_mode: 1, // SEND
            ..Default::default()
        }),
        route_cache_action: route_cache_action(engine.route_cache_action),
        ..Default::default()
    };

    HttpFilter {
        name: EXT_PROC_FILTER_NAME.to_string(),
        config_type: Some(HttpFilterConfigType::TypedConfig(EnvoyAny {
            type_url: EXT_PROC_TYPE_URL.to_string(),
            value: processor.encode_to_vec(),
        })),
        ..Default::default()
    }
}

fn route_cache_action(action: RouteCacheAction) -> i32 {
    match action {
        RouteCacheAction::Default => 0,
        RouteCacheAction::Retain => 1,
        RouteCacheAction::Clear => 2,
    }
}

fn parse_header_send_mode(mode: &str) -> i32 {
    match mode {
        "DEFAULT" => 0,
        "SKIP" => 2,
        // SEND, and anything unrecognized.
        _ => 1,
    }
}

fn dynamic_forward_proxy_filter() -> HttpFilter {
    let config = DfpFilterConfig {
        implementation_specifier: Some(ImplementationSpecifier::DnsCacheConfig(
            clusters::dns_cache_config(),
        )),
        ..Default::default()
    };

    HttpFilter {
        name: "envoy.filters.http.dynamic_forward_proxy".to_string(),
        config_type: Some(HttpFilterConfigType::TypedConfig(EnvoyAny {
            type_url: DFP_FILTER_TYPE_URL.to_string(),
            value: config.encode_to_vec(),
        })),
        ..Default::default()
    }
}

fn tracing_config(router: &RouterConfig) -> Option<HcmTracing> {
    if !router.tracing.enabled {
        return None;
    }

    let otel = OpenTelemetryConfig {
        grpc_service: Some(GrpcService {
            target_specifier: Some(grpc_service::TargetSpecifier::EnvoyGrpc(
                grpc_service::EnvoyGrpc {
                    cluster_name: OTEL_COLLECTOR_CLUSTER.to_string(),
                    ..Default::default()
                },
            )),
            ..Default::default()
        }),
        service_name: router.tracing.service_name.clone(),
        ..Default::default()
    };

    Some(HcmTracing {
        random_sampling: Some(Percent { value: router.tracing.sampling_rate }),
        provider: Some(HttpTracing {
            name: "envoy.tracers.opentelemetry".to_string(),
            config_type: Some(TracingConfigType::TypedConfig(EnvoyAny {
                type_url: OTEL_TYPE_URL.to_string(),
                value: otel.encode_to_vec(),
            })),
        }),
        ..Default::default()
    })
}

fn millis_to_duration(millis: u64) -> ProtoDuration {
    ProtoDuration {
        seconds: (millis / 1000) as i64,
        nanos: ((millis % 1000) * 1_000_000) as i32,
    }
}
