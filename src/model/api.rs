//! Typed spec payloads for API-style configurations.

use serde::{Deserialize, Serialize};

use super::policy::PolicyInstance;

/// Literal token in a context template replaced by the API version.
pub const VERSION_TOKEN: &str = "$version";

/// Spec payload shared by the REST-API and LLM-Provider kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestApiSpec {
    #[serde(default)]
    pub display_name: String,
    pub version: String,
    /// Path prefix; may contain the literal token `$version`.
    pub context: String,
    #[serde(default)]
    pub vhosts: Option<VhostSpec>,
    pub upstream: UpstreamSpec,
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
    #[serde(default)]
    pub policies: Vec<PolicyInstance>,
}

/// Spec payload for the WebSub-API kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSubApiSpec {
    #[serde(default)]
    pub display_name: String,
    pub version: String,
    pub context: String,
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
}

/// Per-environment virtual hosts declared by an API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VhostSpec {
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub sandbox: Option<String>,
}

/// Main and sandbox upstream targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSpec {
    #[serde(default)]
    pub main: Option<UpstreamTarget>,
    #[serde(default)]
    pub sandbox: Option<UpstreamTarget>,
}

/// One upstream target: an inline URL or a reference to a named definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamTarget {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "ref")]
    pub ref_name: Option<String>,
}

/// Separately-defined upstream referenced by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamDefinition {
    #[serde(default)]
    pub urls: Vec<WeightedUrl>,
    #[serde(default)]
    pub timeout: Option<UpstreamTimeout>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedUrl {
    pub url: String,
    #[serde(default)]
    pub weight: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamTimeout {
    /// Human duration string, e.g. `30s`, `500ms`, `1m`, `1h`.
    #[serde(default)]
    pub request: Option<String>,
}

/// One operation (method + path) of an API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSpec {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub policies: Vec<PolicyInstance>,
}

/// Build the full request path for an operation.
///
/// Every `$version` occurrence in the context is substituted with the API
/// version, then the operation path is appended. A trailing slash on the
/// context (the bare `/` context included) does not double up against the
/// operation path's leading slash.
pub fn full_path(context: &str, api_version: &str, operation_path: &str) -> String {
    let context = context.replace(VERSION_TOKEN, api_version);
    let prefix = context.trim_end_matches('/');
    if operation_path.is_empty() {
        return if prefix.is_empty() { "/".to_string() } else { prefix.to_string() };
    }
    format!("{}{}", prefix, operation_path)
}

/// Join key between data-plane routes and the policy engine:
/// `"{METHOD}|{fullPath}|{vhost}"`.
pub fn route_key(method: &str, full_path: &str, vhost: &str) -> String {
    format!("{}|{}|{}", method.to_uppercase(), full_path, vhost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_path_substitutes_version_token() {
        assert_eq!(full_path("/weather/$version", "v1.0", "/forecast"), "/weather/v1.0/forecast");
    }

    #[test]
    fn full_path_root_context_avoids_double_slash() {
        assert_eq!(full_path("/", "v1", "/users"), "/users");
    }

    #[test]
    fn full_path_with_empty_operation_path() {
        assert_eq!(full_path("/store", "v2", ""), "/store");
        assert_eq!(full_path("/", "v2", ""), "/");
    }

    #[test]
    fn route_key_uppercases_method() {
        assert_eq!(
            route_key("get", "/weather/v1.0/forecast", "api.example.com"),
            "GET|/weather/v1.0/forecast|api.example.com"
        );
    }

    #[test]
    fn rest_spec_decodes_from_json() {
        let spec: RestApiSpec = serde_json::from_value(json!({
            "displayName": "Weather",
            "version": "v1.0",
            "context": "/weather/$version",
            "vhosts": { "main": "api.example.com" },
            "upstream": { "main": { "url": "http://backend:8080" } },
            "operations": [
                { "method": "GET", "path": "/forecast" },
                {
                    "method": "POST",
                    "path": "/report",
                    "policies": [{ "name": "rate-limit", "version": "v1" }]
                }
            ],
            "policies": [{ "name": "cors", "version": "v0.1.0" }]
        }))
        .unwrap();

        assert_eq!(spec.display_name, "Weather");
        assert_eq!(spec.context, "/weather/$version");
        assert_eq!(spec.vhosts.as_ref().and_then(|v| v.main.clone()), Some("api.example.com".into()));
        assert_eq!(spec.operations.len(), 2);
        assert_eq!(spec.operations[1].policies[0].name, "rate-limit");
        assert_eq!(spec.policies[0].name, "cors");
        assert!(spec.upstream.sandbox.is_none());
    }

    #[test]
    fn upstream_target_ref_uses_ref_key() {
        let target: UpstreamTarget =
            serde_json::from_value(json!({ "ref": "billing-backend" })).unwrap();
        assert_eq!(target.ref_name.as_deref(), Some("billing-backend"));
        assert!(target.url.is_none());
    }

    #[test]
    fn upstream_definition_decodes_weights_and_timeout() {
        let def: UpstreamDefinition = serde_json::from_value(json!({
            "urls": [
                { "url": "http://a:8080", "weight": 70 },
                { "url": "http://b:8080", "weight": 30 }
            ],
            "timeout": { "request": "30s" }
        }))
        .unwrap();

        assert_eq!(def.urls.len(), 2);
        assert_eq!(def.urls[0].weight, Some(70));
        assert_eq!(def.timeout.unwrap().request.as_deref(), Some("30s"));
    }
}
