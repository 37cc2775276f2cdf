//! # Error Handling
//!
//! This module provides error handling for the Gateplane control plane.
//! It defines custom error types using `thiserror` for all operations.

use std::fmt;

/// Custom result type for Gateplane operations
pub type Result<T> = std::result::Result<T, GateplaneError>;

/// Main error type for the Gateplane control plane
#[derive(thiserror::Error, Debug)]
pub enum GateplaneError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Upstream reference could not be resolved to a usable URL
    #[error("Invalid upstream: {message}")]
    InvalidUpstream { message: String },

    /// Named upstream definition does not exist
    #[error("Upstream reference '{name}' not found")]
    UpstreamRefNotFound { name: String },

    /// Named upstream definition carries no URLs
    #[error("Upstream reference '{name}' has no URLs")]
    UpstreamRefHasNoUrls { name: String },

    /// Upstream timeout string could not be parsed as a duration
    #[error("Invalid timeout format '{value}': {message}")]
    InvalidTimeoutFormat { value: String, message: String },

    /// Policy version selector did not resolve against the definition index
    #[error("Policy version unresolved for '{name}@{selector}': {message}")]
    PolicyVersionUnresolved { name: String, selector: String, message: String },

    /// TLS configuration errors (forbidden cipher characters, missing material)
    #[error("TLS configuration error: {message}")]
    TlsConfig { message: String },

    /// Access log configuration errors (enabled but incomplete for the format)
    #[error("Access log configuration error: {message}")]
    AccessLogConfig { message: String },

    /// A route in the snapshot references a cluster absent from the cluster set
    #[error("Snapshot inconsistent: {message}")]
    SnapshotInconsistent { message: String },

    /// The snapshot cache rejected a publish
    #[error("Cache publish failed: {message}")]
    CachePublish { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Network transport errors (gRPC, HTTP)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Alias used throughout the crate
pub type Error = GateplaneError;

impl GateplaneError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create an invalid upstream error
    pub fn invalid_upstream<S: Into<String>>(message: S) -> Self {
        Self::InvalidUpstream { message: message.into() }
    }

    /// Create an upstream-reference-not-found error
    pub fn upstream_ref_not_found<S: Into<String>>(name: S) -> Self {
        Self::UpstreamRefNotFound { name: name.into() }
    }

    /// Create an upstream-reference-has-no-urls error
    pub fn upstream_ref_has_no_urls<S: Into<String>>(name: S) -> Self {
        Self::UpstreamRefHasNoUrls { name: name.into() }
    }

    /// Create an invalid timeout format error
    pub fn invalid_timeout<V: Into<String>, S: Into<String>>(value: V, message: S) -> Self {
        Self::InvalidTimeoutFormat { value: value.into(), message: message.into() }
    }

    /// Create a policy-version-unresolved error
    pub fn policy_version_unresolved<N, V, S>(name: N, selector: V, message: S) -> Self
    where
        N: Into<String>,
        V: Into<String>,
        S: Into<String>,
    {
        Self::PolicyVersionUnresolved {
            name: name.into(),
            selector: selector.into(),
            message: message.into(),
        }
    }

    /// Create a TLS configuration error
    pub fn tls_config<S: Into<String>>(message: S) -> Self {
        Self::TlsConfig { message: message.into() }
    }

    /// Create an access log configuration error
    pub fn access_log_config<S: Into<String>>(message: S) -> Self {
        Self::AccessLogConfig { message: message.into() }
    }

    /// Create a snapshot-inconsistent error
    pub fn snapshot_inconsistent<S: Into<String>>(message: S) -> Self {
        Self::SnapshotInconsistent { message: message.into() }
    }

    /// Create a cache publish error
    pub fn cache_publish<S: Into<String>>(message: S) -> Self {
        Self::CachePublish { message: message.into() }
    }

    /// Create a serialization error with custom context
    pub fn serialization<S: Into<String>>(source: serde_json::Error, context: S) -> Self {
        Self::Serialization { source, context: context.into() }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Short machine-readable tag for metrics and status reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            GateplaneError::Config { .. } => ErrorKind::Config,
            GateplaneError::Validation { .. } => ErrorKind::Validation,
            GateplaneError::InvalidUpstream { .. } => ErrorKind::InvalidUpstream,
            GateplaneError::UpstreamRefNotFound { .. } => ErrorKind::UpstreamRefNotFound,
            GateplaneError::UpstreamRefHasNoUrls { .. } => ErrorKind::UpstreamRefHasNoUrls,
            GateplaneError::InvalidTimeoutFormat { .. } => ErrorKind::InvalidTimeoutFormat,
            GateplaneError::PolicyVersionUnresolved { .. } => ErrorKind::PolicyVersionUnresolved,
            GateplaneError::TlsConfig { .. } => ErrorKind::TlsConfig,
            GateplaneError::AccessLogConfig { .. } => ErrorKind::AccessLogConfig,
            GateplaneError::SnapshotInconsistent { .. } => ErrorKind::SnapshotInconsistent,
            GateplaneError::CachePublish { .. } => ErrorKind::CachePublish,
            GateplaneError::Serialization { .. } => ErrorKind::Serialization,
            GateplaneError::Transport(_) => ErrorKind::Transport,
            GateplaneError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether this error aborts a whole translation rather than a single config
    pub fn is_bundle_fatal(&self) -> bool {
        matches!(
            self,
            GateplaneError::AccessLogConfig { .. }
                | GateplaneError::TlsConfig { .. }
                | GateplaneError::SnapshotInconsistent { .. }
                | GateplaneError::CachePublish { .. }
                | GateplaneError::Internal { .. }
        )
    }
}

/// Stable error discriminant used in logs and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Validation,
    InvalidUpstream,
    UpstreamRefNotFound,
    UpstreamRefHasNoUrls,
    InvalidTimeoutFormat,
    PolicyVersionUnresolved,
    TlsConfig,
    AccessLogConfig,
    SnapshotInconsistent,
    CachePublish,
    Serialization,
    Transport,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ErrorKind::Config => "config",
            ErrorKind::Validation => "validation",
            ErrorKind::InvalidUpstream => "invalid_upstream",
            ErrorKind::UpstreamRefNotFound => "upstream_ref_not_found",
            ErrorKind::UpstreamRefHasNoUrls => "upstream_ref_has_no_urls",
            ErrorKind::InvalidTimeoutFormat => "invalid_timeout_format",
            ErrorKind::PolicyVersionUnresolved => "policy_version_unresolved",
            ErrorKind::TlsConfig => "tls_config",
            ErrorKind::AccessLogConfig => "access_log_config",
            ErrorKind::SnapshotInconsistent => "snapshot_inconsistent",
            ErrorKind::CachePublish => "cache_publish",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Transport => "transport",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", tag)
    }
}

// Error conversions for common external error types
impl From<serde_json::Error> for GateplaneError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for GateplaneError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<url::ParseError> for GateplaneError {
    fn from(error: url::ParseError) -> Self {
        Self::InvalidUpstream { message: format!("URL parsing failed: {}", error) }
    }
}

impl From<validator::ValidationErrors> for GateplaneError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = GateplaneError::config("Test configuration error");
        assert!(matches!(error, GateplaneError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_upstream_errors_display() {
        assert_eq!(
            GateplaneError::upstream_ref_not_found("backend").to_string(),
            "Upstream reference 'backend' not found"
        );
        assert_eq!(
            GateplaneError::upstream_ref_has_no_urls("backend").to_string(),
            "Upstream reference 'backend' has no URLs"
        );
        let error = GateplaneError::invalid_timeout("banana", "unknown unit");
        assert_eq!(error.to_string(), "Invalid timeout format 'banana': unknown unit");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(GateplaneError::invalid_upstream("x").kind(), ErrorKind::InvalidUpstream);
        assert_eq!(GateplaneError::tls_config("x").kind(), ErrorKind::TlsConfig);
        assert_eq!(GateplaneError::cache_publish("x").kind(), ErrorKind::CachePublish);
        assert_eq!(ErrorKind::PolicyVersionUnresolved.to_string(), "policy_version_unresolved");
    }

    #[test]
    fn test_bundle_fatal_classification() {
        assert!(GateplaneError::access_log_config("json_fields missing").is_bundle_fatal());
        assert!(GateplaneError::snapshot_inconsistent("missing cluster").is_bundle_fatal());
        assert!(!GateplaneError::invalid_upstream("bad url").is_bundle_fatal());
        assert!(!GateplaneError::upstream_ref_not_found("x").is_bundle_fatal());
    }

    #[test]
    fn test_validation_error_field() {
        let error = GateplaneError::validation_field("context must start with '/'", "context");
        if let GateplaneError::Validation { field, .. } = error {
            assert_eq!(field, Some("context".to_string()));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_url_parse_conversion() {
        let url_error = url::Url::parse("::: not a url").unwrap_err();
        let error: GateplaneError = url_error.into();
        assert!(matches!(error, GateplaneError::InvalidUpstream { .. }));
    }
}
