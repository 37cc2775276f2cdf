//! Policy instances and the derived per-route policy chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One policy attachment as declared on an API or operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInstance {
    pub name: String,
    /// Full semver (`v1.2.3`) or a major-only selector (`v1`).
    pub version: String,
    #[serde(default)]
    pub execution_condition: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl PolicyInstance {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            execution_condition: None,
            parameters: serde_json::Value::Null,
        }
    }
}

/// A policy instance whose version selector has been resolved to a full
/// semver present in the definition index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPolicy {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub execution_condition: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ResolvedPolicy {
    pub fn from_instance(instance: &PolicyInstance, resolved_version: String) -> Self {
        Self {
            name: instance.name.clone(),
            version: resolved_version,
            execution_condition: instance.execution_condition.clone(),
            parameters: instance.parameters.clone(),
        }
    }
}

/// Policies applying to a single route, keyed by the route key the
/// translator emits for the same operation and vhost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePolicies {
    pub route_key: String,
    pub policies: Vec<ResolvedPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainMetadata {
    pub api_name: String,
    pub version: String,
    pub context: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resource_version: u64,
}

/// The derived chain for one API. Ephemeral: rebuilt from scratch on every
/// publish, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedPolicyChain {
    pub routes: Vec<RoutePolicies>,
    pub metadata: ChainMetadata,
}

impl DerivedPolicyChain {
    /// Route keys in declaration order.
    pub fn route_keys(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.route_key.as_str()).collect()
    }
}
