//! # Configuration Settings
//!
//! Defines the configuration structure for the Gateplane control plane.
//! Values load from an optional YAML file layered with environment
//! variables (`GATEPLANE_` prefix, `__` separators).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{GateplaneError, Result};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GateplaneConfig {
    /// Router/data-plane configuration driving translation.
    #[validate(nested)]
    pub router: RouterConfig,

    /// xDS server configuration.
    #[validate(nested)]
    pub xds: XdsConfig,

    /// Prometheus exporter configuration.
    pub metrics: MetricsConfig,
}

impl GateplaneConfig {
    /// Load configuration from an optional YAML file plus environment
    /// variables. Environment wins over the file, the file over defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder
            .add_source(config::Environment::with_prefix("GATEPLANE").separator("__"));

        let loaded: GateplaneConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(GateplaneError::from)?;

        if self.router.listener_port == self.xds.port {
            return Err(GateplaneError::validation(
                "Router listener port and xDS port cannot be the same",
            ));
        }

        Ok(())
    }
}

/// Router/global configuration: everything the translator needs to shape
/// listeners, filter chains, and infrastructure clusters.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RouterConfig {
    /// Main Envoy HTTP listener port.
    #[validate(range(min = 1, message = "Listener port must be non-zero"))]
    pub listener_port: u16,

    /// Also emit an HTTPS listener bound to the configured TLS context.
    pub https_enabled: bool,

    /// Applied to the HTTP connection manager.
    pub server_header_transformation: ServerHeaderTransformation,

    pub vhosts: VhostsConfig,

    pub tls: RouterTlsConfig,

    pub policy_engine: PolicyEngineConfig,

    pub access_logs: AccessLogsConfig,

    pub tracing: TracingConfig,

    pub analytics: AnalyticsConfig,

    pub event_gateway: EventGatewayConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listener_port: 9095,
            https_enabled: false,
            server_header_transformation: ServerHeaderTransformation::default(),
            vhosts: VhostsConfig::default(),
            tls: RouterTlsConfig::default(),
            policy_engine: PolicyEngineConfig::default(),
            access_logs: AccessLogsConfig::default(),
            tracing: TracingConfig::default(),
            analytics: AnalyticsConfig::default(),
            event_gateway: EventGatewayConfig::default(),
        }
    }
}

/// HCM `server_header_transformation` options. Unknown strings map to
/// `Overwrite` during deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerHeaderTransformation {
    AppendIfAbsent,
    #[default]
    Overwrite,
    PassThrough,
}

impl ServerHeaderTransformation {
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "APPEND_IF_ABSENT" => Self::AppendIfAbsent,
            "PASS_THROUGH" => Self::PassThrough,
            _ => Self::Overwrite,
        }
    }
}

impl<'de> Deserialize<'de> for ServerHeaderTransformation {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::from_str_lossy(&value))
    }
}

/// Fallback virtual hosts applied when an API does not declare its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VhostsConfig {
    pub main: VhostDefaults,
    pub sandbox: VhostDefaults,
}

impl Default for VhostsConfig {
    fn default() -> Self {
        Self {
            main: VhostDefaults { default: "localhost".to_string() },
            sandbox: VhostDefaults { default: "sandbox.localhost".to_string() },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VhostDefaults {
    pub default: String,
}

/// Downstream TLS material and parameters for the HTTPS listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterTlsConfig {
    pub cert_path: String,
    pub key_path: String,
    /// One of `TLS1_0`..`TLS1_3`; anything else means auto.
    pub min_version: String,
    pub max_version: String,
    /// Comma-separated cipher suite list.
    pub ciphers: String,
}

/// Policy Engine (ext_proc) wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyEngineConfig {
    pub enabled: bool,
    pub mode: PolicyEngineMode,
    /// TCP mode only.
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub message_timeout_ms: u64,
    pub route_cache_action: RouteCacheAction,
    pub request_header_mode: String,
    pub tls: PolicyEngineTlsConfig,
}

impl Default for PolicyEngineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: PolicyEngineMode::Uds,
            host: "127.0.0.1".to_string(),
            port: 9001,
            timeout_ms: 20_000,
            message_timeout_ms: 5_000,
            route_cache_action: RouteCacheAction::Default,
            request_header_mode: "SEND".to_string(),
            tls: PolicyEngineTlsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEngineMode {
    #[default]
    Uds,
    Tcp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteCacheAction {
    #[default]
    Default,
    Retain,
    Clear,
}

/// Optional mTLS from Envoy to the Policy Engine (TCP mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyEngineTlsConfig {
    pub enabled: bool,
    pub cert_path: String,
    pub key_path: String,
    pub ca_path: String,
    pub server_name: String,
    pub skip_verify: bool,
}

/// HCM access log configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessLogsConfig {
    pub enabled: bool,
    pub format: AccessLogFormat,
    /// Required non-empty for JSON format; values are Envoy command
    /// operators such as `%RESPONSE_CODE%`.
    pub json_fields: BTreeMap<String, String>,
    /// Required non-empty for text format.
    pub text_format: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLogFormat {
    #[default]
    Text,
    Json,
}

/// OTEL tracing wiring for the HCM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    /// OTEL collector `host:port`.
    pub endpoint: String,
    /// Percentage, 0.0..=100.0.
    pub sampling_rate: f64,
    pub service_name: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "otel-collector:4317".to_string(),
            sampling_rate: 100.0,
            service_name: "gateplane-router".to_string(),
        }
    }
}

/// gRPC access log sink (ALS) wiring for analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub grpc_access_log_enabled: bool,
    pub host: String,
    pub als_server_port: u16,
    pub log_name: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            grpc_access_log_enabled: false,
            host: "analytics".to_string(),
            als_server_port: 18090,
            log_name: "gateway_access_logs".to_string(),
        }
    }
}

/// WebSub event gateway wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventGatewayConfig {
    pub enabled: bool,
    pub web_sub_hub_url: String,
    pub web_sub_hub_port: u16,
}

impl Default for EventGatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            web_sub_hub_url: "http://websub-hub:9292".to_string(),
            web_sub_hub_port: 9292,
        }
    }
}

/// xDS gRPC server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct XdsConfig {
    pub bind_address: String,

    #[validate(range(min = 1, message = "xDS port must be non-zero"))]
    pub port: u16,

    /// Node id Envoy must report; snapshots are published under it.
    pub node_id: String,
}

impl Default for XdsConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 18000, node_id: "router-node".to_string() }
    }
}

impl XdsConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Prometheus metrics exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, bind_address: "0.0.0.0".to_string(), port: 19010 }
    }
}

impl MetricsConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = GateplaneConfig::default();
        assert_eq!(config.router.listener_port, 9095);
        assert_eq!(config.xds.port, 18000);
        assert_eq!(config.xds.node_id, "router-node");
        assert_eq!(config.xds.bind_address(), "0.0.0.0:18000");
        assert!(!config.router.https_enabled);
        assert!(!config.router.policy_engine.enabled);
    }

    #[test]
    fn server_header_transformation_parses_known_values() {
        assert_eq!(
            ServerHeaderTransformation::from_str_lossy("APPEND_IF_ABSENT"),
            ServerHeaderTransformation::AppendIfAbsent
        );
        assert_eq!(
            ServerHeaderTransformation::from_str_lossy("PASS_THROUGH"),
            ServerHeaderTransformation::PassThrough
        );
        assert_eq!(
            ServerHeaderTransformation::from_str_lossy("OVERWRITE"),
            ServerHeaderTransformation::Overwrite
        );
    }

    #[test]
    fn server_header_transformation_defaults_unknown_to_overwrite() {
        assert_eq!(
            ServerHeaderTransformation::from_str_lossy("SOMETHING_ELSE"),
            ServerHeaderTransformation::Overwrite
        );
        let parsed: ServerHeaderTransformation = serde_json::from_str("\"BOGUS\"").unwrap();
        assert_eq!(parsed, ServerHeaderTransformation::Overwrite);
    }

    #[test]
    fn port_conflict_is_rejected() {
        let mut config = GateplaneConfig::default();
        config.router.listener_port = 18000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn policy_engine_mode_serde() {
        let mode: PolicyEngineMode = serde_json::from_str("\"tcp\"").unwrap();
        assert_eq!(mode, PolicyEngineMode::Tcp);
        let mode: PolicyEngineMode = serde_json::from_str("\"uds\"").unwrap();
        assert_eq!(mode, PolicyEngineMode::Uds);
    }

    #[test]
    fn route_cache_action_serde() {
        let action: RouteCacheAction = serde_json::from_str("\"RETAIN\"").unwrap();
        assert_eq!(action, RouteCacheAction::Retain);
        let action: RouteCacheAction = serde_json::from_str("\"CLEAR\"").unwrap();
        assert_eq!(action, RouteCacheAction::Clear);
    }

    #[test]
    fn access_log_format_serde() {
        let format: AccessLogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, AccessLogFormat::Json);
        assert_eq!(AccessLogFormat::default(), AccessLogFormat::Text);
    }

    #[test]
    fn router_config_deserializes_partial_yaml() {
        let yaml = r#"
listener_port: 8080
https_enabled: true
vhosts:
  main:
    default: api.example.com
policy_engine:
  enabled: true
  mode: tcp
  host: policy-engine
  port: 9002
"#;
        let router: RouterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(router.listener_port, 8080);
        assert!(router.https_enabled);
        assert_eq!(router.vhosts.main.default, "api.example.com");
        // Untouched sections keep their defaults.
        assert_eq!(router.vhosts.sandbox.default, "sandbox.localhost");
        assert_eq!(router.policy_engine.mode, PolicyEngineMode::Tcp);
        assert_eq!(router.policy_engine.host, "policy-engine");
        assert_eq!(router.policy_engine.timeout_ms, 20_000);
    }
}
