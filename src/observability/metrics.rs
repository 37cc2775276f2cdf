//! # Metrics Collection
//!
//! Prometheus metrics for the xDS server and snapshot pipeline, recorded
//! through the `metrics` facade.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::errors::{GateplaneError, Result};

/// Install the Prometheus exporter and register metric descriptions.
pub fn init_metrics(listen: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| {
            GateplaneError::config_with_source("Failed to install metrics exporter", Box::new(e))
        })?;

    describe_gauge!("xds_connected_clients", "Active xDS streams by service and node id");
    describe_counter!("xds_requests_total", "Discovery requests received");
    describe_counter!("xds_acks_total", "Discovery acknowledgements by status (ack/nack)");
    describe_counter!("snapshot_publishes_total", "Snapshot publish attempts by status");
    describe_gauge!("snapshot_version", "Latest snapshot version published per node");

    info!(address = %listen, "Metrics exporter listening");
    Ok(())
}

/// Metrics recorder for xDS and snapshot events.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Track a stream connecting or disconnecting.
    pub fn record_xds_connection(&self, service: &str, node_id: &str, connected: bool) {
        let labels = [("service", service.to_string()), ("node_id", node_id.to_string())];
        if connected {
            gauge!("xds_connected_clients", &labels).increment(1.0);
        } else {
            gauge!("xds_connected_clients", &labels).decrement(1.0);
        }
    }

    /// Count one discovery request.
    pub fn record_xds_request(&self, service: &str, type_url: &str) {
        let labels = [("service", service.to_string()), ("type_url", type_url.to_string())];
        counter!("xds_requests_total", &labels).increment(1);
    }

    /// Count an ACK or NACK of a pushed version.
    pub fn record_xds_ack(&self, service: &str, ack: bool) {
        let status = if ack { "ack" } else { "nack" };
        let labels = [("service", service.to_string()), ("status", status.to_string())];
        counter!("xds_acks_total", &labels).increment(1);
    }

    /// Count a snapshot publish attempt.
    pub fn record_snapshot_publish(&self, node_id: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        let labels = [("node_id", node_id.to_string()), ("status", status.to_string())];
        counter!("snapshot_publishes_total", &labels).increment(1);
    }

    /// Expose the latest published version.
    pub fn update_snapshot_version(&self, node_id: &str, version: u64) {
        let labels = [("node_id", node_id.to_string())];
        gauge!("snapshot_version", &labels).set(version as f64);
    }
}
