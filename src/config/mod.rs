//! # Configuration
//!
//! Router/global configuration consumed by the translator, snapshot
//! manager, and xDS server.

mod settings;

pub use settings::{
    AccessLogFormat, AccessLogsConfig, AnalyticsConfig, EventGatewayConfig, GateplaneConfig,
    MetricsConfig, PolicyEngineConfig, PolicyEngineMode, PolicyEngineTlsConfig, RouteCacheAction,
    RouterConfig, RouterTlsConfig, ServerHeaderTransformation, TracingConfig, VhostDefaults,
    VhostsConfig, XdsConfig,
};
