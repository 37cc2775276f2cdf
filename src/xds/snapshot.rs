//! Snapshot manager: owns the version counter and the publish path.
//!
//! Any change to the stored-configuration set funnels through
//! [`SnapshotManager::update_snapshot`], which re-translates the complete
//! state, merges the SDS secret, verifies consistency, and publishes a
//! new strictly-increasing version to the cache under the configured
//! node id. Concurrent updates serialize on an internal mutex so a slow
//! translation can never overwrite a newer one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::GateplaneConfig;
use crate::errors::Result;
use crate::observability::MetricsRecorder;
use crate::storage::{CertStore, ConfigStore};
use crate::xds::cache::{Snapshot, SnapshotCache};
use crate::xds::secret::SdsSecretManager;
use crate::xds::translator::Translator;

/// Invoked once per input configuration after every publish attempt:
/// `(config_id, success, version, correlation_id)`.
pub type StatusCallback = Arc<dyn Fn(&str, bool, u64, &str) + Send + Sync>;

pub struct SnapshotManager {
    cache: Arc<SnapshotCache>,
    store: Arc<dyn ConfigStore>,
    secrets: SdsSecretManager,
    translator: Translator,
    node_id: String,
    version: AtomicU64,
    update_lock: Mutex<()>,
    status_callback: RwLock<Option<StatusCallback>>,
    metrics: MetricsRecorder,
}

impl SnapshotManager {
    pub fn new(
        config: GateplaneConfig,
        store: Arc<dyn ConfigStore>,
        cert_store: Arc<dyn CertStore>,
        cache: Arc<SnapshotCache>,
    ) -> Self {
        let node_id = config.xds.node_id.clone();
        Self {
            cache,
            store,
            secrets: SdsSecretManager::new(cert_store),
            translator: Translator::new(config),
            node_id,
            version: AtomicU64::new(0),
            update_lock: Mutex::new(()),
            status_callback: RwLock::new(None),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Register the per-configuration status callback.
    pub fn set_status_callback(&self, callback: StatusCallback) {
        if let Ok(mut slot) = self.status_callback.write() {
            *slot = Some(callback);
        }
    }

    pub fn cache(&self) -> Arc<SnapshotCache> {
        Arc::clone(&self.cache)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Current version counter value; the next publish uses the successor.
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Recompute the complete bundle from the stored-configuration set
    /// and publish it. Returns the published version.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn update_snapshot(&self, correlation_id: &str) -> Result<u64> {
        let _guard = self.update_lock.lock().await;

        let configs = self.store.get_all();
        let config_ids: Vec<String> = configs.iter().map(|config| config.id.clone()).collect();

        match self.translate_and_publish(&configs, correlation_id).await {
            Ok((version, failed)) => {
                self.metrics.record_snapshot_publish(&self.node_id, true);
                self.metrics.update_snapshot_version(&self.node_id, version);
                info!(
                    correlation_id = %correlation_id,
                    version,
                    configs = config_ids.len(),
                    skipped = failed.len(),
                    "Published snapshot"
                );

                self.notify(&config_ids, |id| !failed.iter().any(|f| f == id), version, correlation_id);
                Ok(version)
            }
            Err(error) => {
                self.metrics.record_snapshot_publish(&self.node_id, false);
                warn!(
                    correlation_id = %correlation_id,
                    error = %error,
                    "Snapshot update failed"
                );

                self.notify(&config_ids, |_| false, 0, correlation_id);
                Err(error)
            }
        }
    }

    async fn translate_and_publish(
        &self,
        configs: &[crate::model::StoredConfig],
        correlation_id: &str,
    ) -> Result<(u64, Vec<String>)> {
        let definitions = self.store.upstream_definitions();
        let ca_secret = self.secrets.ca_bundle_secret();

        let mut output = self.translator.translate(
            configs,
            &definitions,
            correlation_id,
            ca_secret.is_some(),
        )?;

        if let Some(secret) = ca_secret {
            output.bundle.secrets.push(secret);
        }

        output.bundle.verify_consistency()?;

        // The version is assigned in the same critical section that calls
        // set_snapshot (the caller holds the update lock), so per-node
        // versions observed by Envoy are strictly monotonic.
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Snapshot::new(version, output.bundle.built_resources());
        let published = self.cache.set_snapshot(&self.node_id, snapshot)?;

        Ok((published, output.failed))
    }

    fn notify(
        &self,
        config_ids: &[String],
        success_of: impl Fn(&str) -> bool,
        version: u64,
        correlation_id: &str,
    ) {
        let callback = match self.status_callback.read() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        let Some(callback) = callback else { return };

        for id in config_ids {
            callback(id, success_of(id), version, correlation_id);
        }
    }
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("node_id", &self.node_id)
            .field("version", &self.current_version())
            .finish_non_exhaustive()
    }
}
