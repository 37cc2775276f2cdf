//! Stream lifecycle tracking for the xDS server.
//!
//! Tracks which node id each stream belongs to so connected-client
//! gauges stay accurate across disconnects, counts requests, and
//! classifies ACK/NACK responses. Callbacks absorb every condition into
//! logs and metrics; nothing here can tear down a stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use envoy_types::pb::envoy::service::discovery::v3::DiscoveryRequest;
use tracing::{debug, info, warn};

use crate::observability::MetricsRecorder;

/// Node id recorded for streams whose first request carries no node.
pub const UNKNOWN_NODE_ID: &str = "unknown";

#[derive(Debug, Default)]
pub struct StreamCallbacks {
    next_stream_id: AtomicU64,
    /// stream id → node id, recorded on the first request per stream.
    nodes: Mutex<HashMap<u64, String>>,
    metrics: MetricsRecorder,
}

impl StreamCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign an id to a newly opened stream.
    pub fn on_stream_open(&self, service: &str) -> u64 {
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(stream_id, service, "xDS stream opened");
        stream_id
    }

    /// Record a discovery request. The first request per stream binds the
    /// stream to its node id and bumps the connected-clients gauge.
    pub fn on_stream_request(&self, stream_id: u64, service: &str, request: &DiscoveryRequest) {
        self.metrics.record_xds_request(service, &request.type_url);

        let node_id = request
            .node
            .as_ref()
            .map(|node| node.id.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or(UNKNOWN_NODE_ID)
            .to_string();

        let first_request = {
            let Ok(mut nodes) = self.nodes.lock() else { return };
            match nodes.get(&stream_id) {
                Some(_) => false,
                None => {
                    nodes.insert(stream_id, node_id.clone());
                    true
                }
            }
        };

        if first_request {
            self.metrics.record_xds_connection(service, &node_id, true);
            info!(stream_id, service, node_id = %node_id, "xDS stream identified");
        }

        if let Some(error_detail) = &request.error_detail {
            warn!(
                stream_id,
                service,
                type_url = %request.type_url,
                nonce = %request.response_nonce,
                error_code = error_detail.code,
                error_message = %error_detail.message,
                "[NACK] Envoy rejected previous response"
            );
        }
    }

    /// Classify a sent response: ACK when the request's version differs
    /// from the response version, NACK otherwise.
    pub fn on_stream_response(
        &self,
        stream_id: u64,
        service: &str,
        request_version: &str,
        response_version: &str,
    ) {
        let ack = request_version != response_version;
        self.metrics.record_xds_ack(service, ack);
        debug!(
            stream_id,
            service,
            request_version,
            response_version,
            ack,
            "xDS response recorded"
        );
    }

    /// Record a NACK observed without sending a response.
    pub fn on_stream_nack(&self, service: &str) {
        self.metrics.record_xds_ack(service, false);
    }

    /// Drop the stream's node binding and decrement the gauge with the
    /// node id recorded at identification time.
    pub fn on_stream_closed(&self, stream_id: u64, service: &str) {
        let node_id = {
            let Ok(mut nodes) = self.nodes.lock() else { return };
            nodes.remove(&stream_id)
        };

        if let Some(node_id) = node_id {
            self.metrics.record_xds_connection(service, &node_id, false);
            info!(stream_id, service, node_id = %node_id, "xDS stream closed");
        } else {
            info!(stream_id, service, "xDS stream closed before identification");
        }
    }

    /// Node id recorded for a stream, if any.
    pub fn node_of(&self, stream_id: u64) -> Option<String> {
        self.nodes.lock().ok()?.get(&stream_id).cloned()
    }

    /// Number of currently tracked streams.
    pub fn tracked_streams(&self) -> usize {
        self.nodes.lock().map(|nodes| nodes.len()).unwrap_or(0)
    }
}
