//! # Observability
//!
//! Metric names and recording helpers for the control plane.

pub mod metrics;

pub use metrics::{init_metrics, MetricsRecorder};
