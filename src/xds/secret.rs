//! SDS secret construction.
//!
//! The cert store yields a combined PEM bundle of trusted CAs; it becomes
//! one Envoy Secret (`upstream_ca_bundle`) holding a validation context
//! with the bundle inlined. An empty store produces no secret, in which
//! case upstream TLS validation falls back to system trust.

use std::sync::Arc;

use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    secret, CertificateValidationContext, Secret,
};
use tracing::debug;

use crate::storage::CertStore;
use crate::xds::resources::UPSTREAM_CA_BUNDLE_SECRET;

/// Builds the SDS secret set from the cert store.
#[derive(Clone)]
pub struct SdsSecretManager {
    cert_store: Arc<dyn CertStore>,
}

impl SdsSecretManager {
    pub fn new(cert_store: Arc<dyn CertStore>) -> Self {
        Self { cert_store }
    }

    /// The current CA-bundle secret, or `None` when the store is empty.
    pub fn ca_bundle_secret(&self) -> Option<Secret> {
        let bundle = self.cert_store.combined_certificates()?;
        if bundle.is_empty() {
            return None;
        }

        debug!(bundle_bytes = bundle.len(), "Built upstream CA bundle secret");

        Some(Secret {
            name: UPSTREAM_CA_BUNDLE_SECRET.to_string(),
            r#type: Some(secret::Type::ValidationContext(CertificateValidationContext {
                trusted_ca: Some(DataSource {
                    specifier: Some(Specifier::InlineBytes(bundle)),
                    ..Default::default()
                }),
                ..Default::default()
            })),
        })
    }
}

impl std::fmt::Debug for SdsSecretManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdsSecretManager").finish_non_exhaustive()
    }
}
