//! TLS context construction for listeners and upstream clusters.
//!
//! Downstream certificates and the upstream trusted-CA bundle are both
//! delivered over SDS; only protocol parameters and file paths come from
//! static configuration.

use envoy_types::pb::envoy::config::core::v3::{
    api_config_source::ApiType, config_source::ConfigSourceSpecifier, grpc_service,
    transport_socket::ConfigType as TransportSocketConfigType, ApiConfigSource, ApiVersion,
    ConfigSource, DataSource, GrpcService, TransportSocket,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context::ValidationContextType, tls_parameters::TlsProtocol, CommonTlsContext,
    DownstreamTlsContext, SdsSecretConfig, TlsCertificate, TlsParameters, UpstreamTlsContext,
};
use envoy_types::pb::google::protobuf::Any;
use prost::Message;

use crate::config::RouterTlsConfig;
use crate::errors::{Error, Result};
use crate::xds::resources::{ROUTER_TLS_CERT_SECRET, SDS_CLUSTER, UPSTREAM_CA_BUNDLE_SECRET};

const DOWNSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";
const UPSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";

/// Map a configured protocol-version string to the Envoy enum. Anything
/// outside `TLS1_0`..`TLS1_3` means auto.
pub fn tls_protocol_version(value: &str) -> TlsProtocol {
    match value {
        "TLS1_0" => TlsProtocol::TlSv10,
        "TLS1_1" => TlsProtocol::TlSv11,
        "TLS1_2" => TlsProtocol::TlSv12,
        "TLS1_3" => TlsProtocol::TlSv13,
        _ => TlsProtocol::TlsAuto,
    }
}

/// Split a comma-separated cipher list, trimming surrounding whitespace
/// per element. `;` and `|` are rejected outright; an empty string yields
/// no cipher list.
pub fn parse_cipher_suites(value: &str) -> Result<Vec<String>> {
    if value.contains(';') || value.contains('|') {
        return Err(Error::tls_config(format!(
            "cipher suite list contains forbidden characters: '{}'",
            value
        )));
    }

    Ok(value
        .split(',')
        .map(str::trim)
        .filter(|element| !element.is_empty())
        .map(str::to_string)
        .collect())
}

/// Protocol parameters from the router TLS configuration.
pub fn tls_parameters(config: &RouterTlsConfig) -> Result<TlsParameters> {
    Ok(TlsParameters {
        tls_minimum_protocol_version: tls_protocol_version(&config.min_version) as i32,
        tls_maximum_protocol_version: tls_protocol_version(&config.max_version) as i32,
        cipher_suites: parse_cipher_suites(&config.ciphers)?,
        ..Default::default()
    })
}

/// Config source pointing secret fetches at the in-process SDS server.
pub fn sds_config_source() -> ConfigSource {
    ConfigSource {
        config_source_specifier: Some(ConfigSourceSpecifier::ApiConfigSource(ApiConfigSource {
            api_type: ApiType::Grpc as i32,
            transport_api_version: ApiVersion::V3 as i32,
            grpc_services: vec![GrpcService {
                target_specifier: Some(grpc_service::TargetSpecifier::EnvoyGrpc(
                    grpc_service::EnvoyGrpc {
                        cluster_name: SDS_CLUSTER.to_string(),
                        ..Default::default()
                    },
                )),
                ..Default::default()
            }],
            ..Default::default()
        })),
        resource_api_version: ApiVersion::V3 as i32,
        ..Default::default()
    }
}

fn sds_secret_ref(name: &str) -> SdsSecretConfig {
    SdsSecretConfig { name: name.to_string(), sds_config: Some(sds_config_source()) }
}

/// Downstream TLS transport socket for the HTTPS listener. The serving
/// certificate is referenced through SDS; protocol parameters come from
/// configuration.
pub fn downstream_transport_socket(config: &RouterTlsConfig) -> Result<TransportSocket> {
    let common = CommonTlsContext {
        tls_params: Some(tls_parameters(config)?),
        tls_certificate_sds_secret_configs: vec![sds_secret_ref(ROUTER_TLS_CERT_SECRET)],
        ..Default::default()
    };

    let downstream = DownstreamTlsContext { common_tls_context: Some(common), ..Default::default() };

    Ok(TransportSocket {
        name: "envoy.transport_sockets.tls".to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(Any {
            type_url: DOWNSTREAM_TLS_TYPE_URL.to_string(),
            value: downstream.encode_to_vec(),
        })),
    })
}

/// Upstream TLS transport socket for https clusters. When the cert store
/// has published a CA bundle the validation context references it via
/// SDS; otherwise validation falls back to system trust.
pub fn upstream_transport_socket(sni: &str, validate_with_ca_bundle: bool) -> TransportSocket {
    let mut common = CommonTlsContext::default();
    if validate_with_ca_bundle {
        common.validation_context_type = Some(ValidationContextType::ValidationContextSdsSecretConfig(
            sds_secret_ref(UPSTREAM_CA_BUNDLE_SECRET),
        ));
    }

    let upstream = UpstreamTlsContext {
        common_tls_context: Some(common),
        sni: sni.to_string(),
        ..Default::default()
    };

    TransportSocket {
        name: "envoy.transport_sockets.tls".to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(Any {
            type_url: UPSTREAM_TLS_TYPE_URL.to_string(),
            value: upstream.encode_to_vec(),
        })),
    }
}

/// mTLS transport socket towards the Policy Engine, built from file
/// paths; the engine sits next to the router, not behind SDS.
pub fn mutual_tls_transport_socket(
    cert_path: &str,
    key_path: &str,
    ca_path: &str,
    server_name: &str,
    skip_verify: bool,
) -> Result<TransportSocket> {
    if cert_path.is_empty() || key_path.is_empty() {
        return Err(Error::tls_config(
            "policy engine mTLS requires both cert_path and key_path",
        ));
    }

    let mut common = CommonTlsContext {
        tls_certificates: vec![TlsCertificate {
            certificate_chain: Some(file_data_source(cert_path)),
            private_key: Some(file_data_source(key_path)),
            ..Default::default()
        }],
        ..Default::default()
    };

    if !skip_verify && !ca_path.is_empty() {
        common.validation_context_type = Some(ValidationContextType::ValidationContext(
            envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::CertificateValidationContext {
                trusted_ca: Some(file_data_source(ca_path)),
                ..Default::default()
            },
        ));
    }

    let upstream = UpstreamTlsContext {
        common_tls_context: Some(common),
        sni: server_name.to_string(),
        ..Default::default()
    };

    Ok(TransportSocket {
        name: "envoy.transport_sockets.tls".to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(Any {
            type_url: UPSTREAM_TLS_TYPE_URL.to_string(),
            value: upstream.encode_to_vec(),
        })),
    })
}

fn file_data_source(path: &str) -> DataSource {
    DataSource {
        specifier: Some(
            envoy_types::pb::envoy::config::core::v3::data_source::Specifier::Filename(
                path.to_string(),
            ),
        ),
        ..Default::default()
    }
}
