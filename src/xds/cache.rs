//! Snapshot cache keyed by data-plane node identity.
//!
//! The snapshot manager is the only writer; per-stream tasks read the
//! current snapshot and wake up on the broadcast channel when a new
//! version lands.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::errors::{Error, Result};
use crate::xds::resources::BuiltResource;

/// A versioned, consistent bundle of resources for one node.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    version: u64,
    resources: HashMap<String, Vec<BuiltResource>>,
}

impl Snapshot {
    pub fn new(version: u64, resources: HashMap<&'static str, Vec<BuiltResource>>) -> Self {
        Self {
            version,
            resources: resources
                .into_iter()
                .map(|(type_url, list)| (type_url.to_string(), list))
                .collect(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version as carried in discovery responses.
    pub fn version_info(&self) -> String {
        self.version.to_string()
    }

    /// Resources of one type, in translation order.
    pub fn resources(&self, type_url: &str) -> &[BuiltResource] {
        self.resources.get(type_url).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resources of one type filtered to the requested names; an empty
    /// name list subscribes to everything (SOTW wildcard).
    pub fn resources_named(&self, type_url: &str, names: &[String]) -> Vec<BuiltResource> {
        let all = self.resources(type_url);
        if names.is_empty() {
            return all.to_vec();
        }
        all.iter().filter(|resource| names.contains(&resource.name)).cloned().collect()
    }
}

/// Publish notification delivered to per-stream tasks.
#[derive(Debug, Clone)]
pub struct SnapshotEvent {
    pub node_id: String,
    pub version: u64,
}

/// Per-node snapshot storage with publish notifications.
#[derive(Debug)]
pub struct SnapshotCache {
    snapshots: RwLock<HashMap<String, Arc<Snapshot>>>,
    update_tx: broadcast::Sender<SnapshotEvent>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(128);
        Self { snapshots: RwLock::new(HashMap::new()), update_tx }
    }

    /// Publish a snapshot for `node_id`. Versions must be strictly
    /// increasing per node; a stale publish is refused so a slower
    /// translation can never overwrite a newer one.
    pub fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) -> Result<u64> {
        let version = snapshot.version();

        {
            let mut snapshots = self
                .snapshots
                .write()
                .map_err(|_| Error::cache_publish("snapshot cache lock poisoned"))?;

            if let Some(existing) = snapshots.get(node_id) {
                if existing.version() >= version {
                    return Err(Error::cache_publish(format!(
                        "stale snapshot for node '{}': version {} <= current {}",
                        node_id,
                        version,
                        existing.version()
                    )));
                }
            }

            snapshots.insert(node_id.to_string(), Arc::new(snapshot));
        }

        // Receivers may or may not exist; a send into the void is fine.
        let _ = self.update_tx.send(SnapshotEvent { node_id: node_id.to_string(), version });
        Ok(version)
    }

    /// The current snapshot for a node, if one was ever published.
    pub fn snapshot(&self, node_id: &str) -> Option<Arc<Snapshot>> {
        self.snapshots.read().ok()?.get(node_id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotEvent> {
        self.update_tx.subscribe()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.snapshots.read().map(|map| map.keys().cloned().collect()).unwrap_or_default()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}
