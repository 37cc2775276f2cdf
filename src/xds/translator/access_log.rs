//! Access log stanzas for the HTTP connection manager.
//!
//! Two independent sinks: a stdout log shaped by the configured format
//! (json or text), and a gRPC access-log-service sink when analytics is
//! enabled.

use envoy_types::pb::envoy::config::accesslog::v3::{
    access_log::ConfigType as AccessLogConfigType, AccessLog,
};
use envoy_types::pb::envoy::config::core::v3::{
    grpc_service, ApiVersion, GrpcService, SubstitutionFormatString,
};
use envoy_types::pb::envoy::extensions::access_loggers::grpc::v3::{
    CommonGrpcAccessLogConfig, HttpGrpcAccessLogConfig,
};
use envoy_types::pb::envoy::extensions::access_loggers::stream::v3::{
    stdout_access_log, StdoutAccessLog,
};
use envoy_types::pb::google::protobuf::{Any as EnvoyAny, Struct as ProstStruct, Value as ProstValue};
use prost::Message;

use crate::config::{AccessLogFormat, RouterConfig};
use crate::errors::{Error, Result};
use crate::xds::resources::ACCESS_LOG_SINK_CLUSTER;

const STDOUT_ACCESS_LOG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.access_loggers.stream.v3.StdoutAccessLog";
const HTTP_GRPC_ACCESS_LOG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.access_loggers.grpc.v3.HttpGrpcAccessLogConfig";

/// Build the access-log list for an HCM. Disabled logging yields no
/// stanza at all; a misconfigured enabled format is a bundle-wide error.
pub fn build_access_logs(router: &RouterConfig) -> Result<Vec<AccessLog>> {
    let mut logs = Vec::new();

    if router.access_logs.enabled {
        logs.push(stdout_log(router)?);
    }

    if router.analytics.grpc_access_log_enabled {
        logs.push(grpc_access_log(&router.analytics.log_name));
    }

    Ok(logs)
}

fn stdout_log(router: &RouterConfig) -> Result<AccessLog> {
    let format = match router.access_logs.format {
        AccessLogFormat::Json => {
            if router.access_logs.json_fields.is_empty() {
                return Err(Error::access_log_config(
                    "access logging is enabled with format=json but jsonFields is empty",
                ));
            }

            let fields = router
                .access_logs
                .json_fields
                .iter()
                .map(|(key, operator)| {
                    (
                        key.clone(),
                        ProstValue {
                            kind: Some(
                                envoy_types::pb::google::protobuf::value::Kind::StringValue(
                                    operator.clone(),
                                ),
                            ),
                        },
                    )
                })
                .collect();

            envoy_types::pb::envoy::config::core::v3::substitution_format_string::Format::JsonFormat(
                ProstStruct { fields },
            )
        }
        AccessLogFormat::Text => {
            if router.access_logs.text_format.is_empty() {
                return Err(Error::access_log_config(
                    "access logging is enabled with format=text but textFormat is empty",
                ));
            }

            envoy_types::pb::envoy::config::core::v3::substitution_format_string::Format::TextFormat(
                router.access_logs.text_format.clone(),
            )
        }
    };

    let stdout = StdoutAccessLog {
        access_log_format: Some(stdout_access_log::AccessLogFormat::LogFormat(
            SubstitutionFormatString { format: Some(format), ..Default::default() },
        )),
    };

    Ok(AccessLog {
        name: "envoy.access_loggers.stdout".to_string(),
        filter: None,
        config_type: Some(AccessLogConfigType::TypedConfig(EnvoyAny {
            type_url: STDOUT_ACCESS_LOG_TYPE_URL.to_string(),
            value: stdout.encode_to_vec(),
        })),
    })
}

fn grpc_access_log(log_name: &str) -> AccessLog {
    let common_config = CommonGrpcAccessLogConfig {
        log_name: log_name.to_string(),
        grpc_service: Some(GrpcService {
            target_specifier: Some(grpc_service::TargetSpecifier::EnvoyGrpc(
                grpc_service::EnvoyGrpc {
                    cluster_name: ACCESS_LOG_SINK_CLUSTER.to_string(),
                    ..Default::default()
                },
            )),
            ..Default::default()
        }),
        transport_api_version: ApiVersion::V3 as i32,
        ..Default::default()
    };

    let http_grpc_config =
        HttpGrpcAccessLogConfig { common_config: Some(common_config), ..Default::default() };

    AccessLog {
        name: "envoy.access_loggers.http_grpc".to_string(),
        filter: None,
        config_type: Some(AccessLogConfigType::TypedConfig(EnvoyAny {
            type_url: HTTP_GRPC_ACCESS_LOG_TYPE_URL.to_string(),
            value: http_grpc_config.encode_to_vec(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessLogsConfig;

    fn router_with(access_logs: AccessLogsConfig) -> RouterConfig {
        RouterConfig { access_logs, ..Default::default() }
    }

    #[test]
    fn disabled_logging_emits_nothing() {
        let logs = build_access_logs(&RouterConfig::default()).unwrap();
        assert!(logs.is_empty());
    }

    #[test]
    fn json_format_requires_fields() {
        let router = router_with(AccessLogsConfig {
            enabled: true,
            format: AccessLogFormat::Json,
            ..Default::default()
        });
        let error = build_access_logs(&router).unwrap_err();
        assert!(matches!(error, Error::AccessLogConfig { .. }));
    }

    #[test]
    fn text_format_requires_template() {
        let router = router_with(AccessLogsConfig {
            enabled: true,
            format: AccessLogFormat::Text,
            ..Default::default()
        });
        assert!(build_access_logs(&router).is_err());
    }

    #[test]
    fn json_fields_land_in_struct() {
        let mut json_fields = std::collections::BTreeMap::new();
        json_fields.insert("status".to_string(), "%RESPONSE_CODE%".to_string());
        json_fields.insert("path".to_string(), "%REQ(:PATH)%".to_string());

        let router = router_with(AccessLogsConfig {
            enabled: true,
            format: AccessLogFormat::Json,
            json_fields,
            ..Default::default()
        });

        let logs = build_access_logs(&router).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].name, "envoy.access_loggers.stdout");

        let any = match logs[0].config_type.as_ref() {
            Some(AccessLogConfigType::TypedConfig(any)) => any,
            other => panic!("expected typed config, got {:?}", other),
        };
        let stdout = StdoutAccessLog::decode(&any.value[..]).unwrap();
        let format = match stdout.access_log_format.unwrap() {
            stdout_access_log::AccessLogFormat::LogFormat(format) => format,
        };
        match format.format.unwrap() {
            envoy_types::pb::envoy::config::core::v3::substitution_format_string::Format::JsonFormat(
                fields,
            ) => {
                assert!(fields.fields.contains_key("status"));
                assert!(fields.fields.contains_key("path"));
            }
            other => panic!("expected json format, got {:?}", other),
        }
    }

    #[test]
    fn text_format_is_carried_verbatim() {
        let router = router_with(AccessLogsConfig {
            enabled: true,
            format: AccessLogFormat::Text,
            text_format: "[%START_TIME%] %RESPONSE_CODE%\n".to_string(),
            ..Default::default()
        });

        let logs = build_access_logs(&router).unwrap();
        let any = match logs[0].config_type.as_ref() {
            Some(AccessLogConfigType::TypedConfig(any)) => any,
            other => panic!("expected typed config, got {:?}", other),
        };
        let stdout = StdoutAccessLog::decode(&any.value[..]).unwrap();
        let format = match stdout.access_log_format.unwrap() {
            stdout_access_log::AccessLogFormat::LogFormat(format) => format,
        };
        match format.format.unwrap() {
            envoy_types::pb::envoy::config::core::v3::substitution_format_string::Format::TextFormat(
                text,
            ) => assert!(text.contains("%RESPONSE_CODE%")),
            other => panic!("expected text format, got {:?}", other),
        }
    }

    #[test]
    fn analytics_sink_appends_grpc_log() {
        let mut router = RouterConfig::default();
        router.analytics.grpc_access_log_enabled = true;
        router.analytics.log_name = "gw_logs".to_string();

        let logs = build_access_logs(&router).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].name, "envoy.access_loggers.http_grpc");

        let any = match logs[0].config_type.as_ref() {
            Some(AccessLogConfigType::TypedConfig(any)) => any,
            other => panic!("expected typed config, got {:?}", other),
        };
        let decoded = HttpGrpcAccessLogConfig::decode(&any.value[..]).unwrap();
        let common = decoded.common_config.unwrap();
        assert_eq!(common.log_name, "gw_logs");
        match common.grpc_service.unwrap().target_specifier.unwrap() {
            grpc_service::TargetSpecifier::EnvoyGrpc(envoy_grpc) => {
                assert_eq!(envoy_grpc.cluster_name, ACCESS_LOG_SINK_CLUSTER);
            }
            other => panic!("expected EnvoyGrpc, got {:?}", other),
        }
    }
}
