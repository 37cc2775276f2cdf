//! Interfaces to the collaborators that own persistent state.
//!
//! The core never touches a database: it consumes stored configurations,
//! policy definitions, and trusted-CA material through the traits below.
//! The in-memory implementations back tests and embedders that drive the
//! snapshot manager directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::model::{StoredConfig, UpstreamDefinition};

/// Read access to the stored-configuration set. Implementations must be
/// safe to call concurrently with mutations and return a consistent
/// snapshot from `get_all`.
pub trait ConfigStore: Send + Sync {
    fn get_all(&self) -> Vec<StoredConfig>;

    /// Named upstream definitions referenced by `upstream.ref`.
    fn upstream_definitions(&self) -> BTreeMap<String, UpstreamDefinition> {
        BTreeMap::new()
    }
}

/// Lookup of known policy definition versions by policy name.
pub trait PolicyDefinitionIndex: Send + Sync {
    /// Full semver versions (`v1.2.3` form) known for `name`.
    fn versions(&self, name: &str) -> Vec<String>;
}

/// Source of trusted-CA material for upstream TLS validation.
pub trait CertStore: Send + Sync {
    /// Combined PEM bundle of trusted CAs, or `None` when the store is empty.
    fn combined_certificates(&self) -> Option<Vec<u8>>;
}

/// Thread-safe in-memory configuration store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryConfigStore {
    configs: Arc<DashMap<String, StoredConfig>>,
    upstreams: Arc<DashMap<String, UpstreamDefinition>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, config: StoredConfig) {
        self.configs.insert(config.id.clone(), config);
    }

    pub fn remove(&self, id: &str) -> Option<StoredConfig> {
        self.configs.remove(id).map(|(_, config)| config)
    }

    pub fn define_upstream(&self, name: impl Into<String>, definition: UpstreamDefinition) {
        self.upstreams.insert(name.into(), definition);
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get_all(&self) -> Vec<StoredConfig> {
        let mut configs: Vec<StoredConfig> =
            self.configs.iter().map(|entry| entry.value().clone()).collect();
        // Deterministic translation input order regardless of map iteration.
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }

    fn upstream_definitions(&self) -> BTreeMap<String, UpstreamDefinition> {
        self.upstreams
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// In-memory policy definition index.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPolicyIndex {
    versions: Arc<DashMap<String, Vec<String>>>,
}

impl InMemoryPolicyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, name: impl Into<String>, version: impl Into<String>) {
        self.versions.entry(name.into()).or_default().push(version.into());
    }
}

impl PolicyDefinitionIndex for InMemoryPolicyIndex {
    fn versions(&self, name: &str) -> Vec<String> {
        self.versions.get(name).map(|entry| entry.value().clone()).unwrap_or_default()
    }
}

/// Cert store holding an already-combined PEM bundle.
#[derive(Debug, Default, Clone)]
pub struct StaticCertStore {
    bundle: Option<Vec<u8>>,
}

impl StaticCertStore {
    pub fn empty() -> Self {
        Self { bundle: None }
    }

    pub fn with_bundle(bundle: Vec<u8>) -> Self {
        Self { bundle: if bundle.is_empty() { None } else { Some(bundle) } }
    }
}

impl CertStore for StaticCertStore {
    fn combined_certificates(&self) -> Option<Vec<u8>> {
        self.bundle.clone()
    }
}
