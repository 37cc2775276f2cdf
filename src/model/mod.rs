//! Data model shared by the translator, policy deriver, and snapshot manager.
//!
//! A [`StoredConfig`] is one persisted declarative configuration as handed
//! over by the persistence layer. Its `spec` payload stays opaque
//! (`serde_json::Value`) until translation time, when the kind-specific
//! decoder turns it into a typed spec.

pub mod api;
pub mod policy;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use api::{
    full_path, route_key, OperationSpec, RestApiSpec, UpstreamDefinition, UpstreamSpec,
    UpstreamTarget, UpstreamTimeout, VhostSpec, WebSubApiSpec, WeightedUrl,
};
pub use policy::{ChainMetadata, DerivedPolicyChain, PolicyInstance, ResolvedPolicy, RoutePolicies};

/// Label key carrying the owning project id, when present.
pub const PROJECT_ID_LABEL: &str = "project-id";

/// Kind discriminator for stored configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigKind {
    #[serde(rename = "REST-API")]
    RestApi,
    #[serde(rename = "LLM-Provider")]
    LlmProvider,
    #[serde(rename = "WebSub-API")]
    WebSubApi,
    #[serde(rename = "LLM-Provider-Template")]
    LlmProviderTemplate,
}

impl ConfigKind {
    /// Stable string form used in route metadata and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::RestApi => "REST-API",
            ConfigKind::LlmProvider => "LLM-Provider",
            ConfigKind::WebSubApi => "WebSub-API",
            ConfigKind::LlmProviderTemplate => "LLM-Provider-Template",
        }
    }
}

/// Name, version, and labels attached to a stored configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ConfigMetadata {
    pub fn project_id(&self) -> Option<&str> {
        self.labels.get(PROJECT_ID_LABEL).map(String::as_str)
    }
}

/// One persisted declarative configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConfig {
    pub id: String,
    pub kind: ConfigKind,
    pub metadata: ConfigMetadata,
    /// Kind-specific payload, decoded at translation time.
    pub spec: serde_json::Value,
    /// Opaque nested map; only `template` and the provider name are
    /// extracted from it, and only for LLM kinds.
    #[serde(default, rename = "sourceConfiguration")]
    pub source_configuration: serde_json::Value,
}

impl StoredConfig {
    pub fn new(
        id: impl Into<String>,
        kind: ConfigKind,
        metadata: ConfigMetadata,
        spec: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            metadata,
            spec,
            source_configuration: serde_json::Value::Null,
        }
    }

    /// Decode the kind-specific REST spec payload. Valid for the REST-API
    /// and LLM-Provider kinds, which share the spec shape.
    pub fn rest_spec(&self) -> crate::Result<RestApiSpec> {
        serde_json::from_value(self.spec.clone()).map_err(|e| {
            crate::Error::serialization(e, format!("Invalid API spec for config '{}'", self.id))
        })
    }

    /// Decode the WebSub spec payload.
    pub fn web_sub_spec(&self) -> crate::Result<WebSubApiSpec> {
        serde_json::from_value(self.spec.clone()).map_err(|e| {
            crate::Error::serialization(e, format!("Invalid WebSub spec for config '{}'", self.id))
        })
    }

    /// Template handle extracted from the source configuration (LLM kinds).
    pub fn template_handle(&self) -> Option<&str> {
        self.source_configuration.get("template").and_then(serde_json::Value::as_str)
    }

    /// Provider name extracted from the source configuration (LLM kinds).
    pub fn provider_name(&self) -> Option<&str> {
        self.source_configuration
            .get("provider")
            .or_else(|| self.source_configuration.get("providerName"))
            .and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_serde_tags_round_trip() {
        for (kind, tag) in [
            (ConfigKind::RestApi, "\"REST-API\""),
            (ConfigKind::LlmProvider, "\"LLM-Provider\""),
            (ConfigKind::WebSubApi, "\"WebSub-API\""),
            (ConfigKind::LlmProviderTemplate, "\"LLM-Provider-Template\""),
        ] {
            assert_eq!(serde_json::to_string(&kind).unwrap(), tag);
            let parsed: ConfigKind = serde_json::from_str(tag).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn project_id_comes_from_labels() {
        let mut labels = BTreeMap::new();
        labels.insert(PROJECT_ID_LABEL.to_string(), "proj-42".to_string());
        let metadata =
            ConfigMetadata { name: "weather".into(), version: "v1.0".into(), labels };
        assert_eq!(metadata.project_id(), Some("proj-42"));
    }

    #[test]
    fn llm_source_info_extraction() {
        let mut config = StoredConfig::new(
            "cfg-1",
            ConfigKind::LlmProvider,
            ConfigMetadata {
                name: "openai".into(),
                version: "v1".into(),
                labels: BTreeMap::new(),
            },
            json!({}),
        );
        config.source_configuration = json!({
            "template": "chat-completions",
            "provider": "openai",
        });

        assert_eq!(config.template_handle(), Some("chat-completions"));
        assert_eq!(config.provider_name(), Some("openai"));
    }

    #[test]
    fn missing_source_configuration_yields_none() {
        let config = StoredConfig::new(
            "cfg-2",
            ConfigKind::RestApi,
            ConfigMetadata {
                name: "api".into(),
                version: "v1".into(),
                labels: BTreeMap::new(),
            },
            json!({}),
        );
        assert_eq!(config.template_handle(), None);
        assert_eq!(config.provider_name(), None);
    }
}
