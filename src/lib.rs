//! # Gateplane
//!
//! Gateplane is the control plane of an API gateway built on Envoy. It
//! accepts declarative API configurations, translates them into Envoy
//! data-plane resources, and continuously serves those resources to one
//! or more Envoy routers over the xDS protocol, so routing and upstream
//! behavior change without restarting the data plane.
//!
//! ## Architecture
//!
//! ```text
//! StoredConfig store → Translator → ResourceBundle ┐
//!                    → Policy Deriver → chains     ├→ Snapshot Manager
//! Cert store → SDS Secret Manager → CA secret      ┘        ↓
//!                                             SnapshotCache → xDS Server → Envoy
//! ```
//!
//! ## Core Components
//!
//! - **Translator**: compiles stored configurations plus router
//!   configuration into listeners, routes, clusters, endpoints
//! - **Policy Deriver**: materializes per-route policy chains for the
//!   Policy Engine, keyed identically to the translator's routes
//! - **Snapshot Manager**: versions and publishes consistent bundles to
//!   the snapshot cache, keyed by node id
//! - **xDS Server**: tonic-based gRPC server implementing ADS and the
//!   typed discovery services against the snapshot cache

pub mod config;
pub mod errors;
pub mod model;
pub mod observability;
pub mod policy;
pub mod storage;
pub mod xds;

// Re-export commonly used types and traits
pub use config::GateplaneConfig;
pub use errors::{Error, ErrorKind, GateplaneError, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
