//! Upstream resolution.
//!
//! Turns an upstream reference (inline URL or named definition) into the
//! cluster name, parsed URL, and optional request timeout the cluster and
//! route builders consume.

use std::collections::BTreeMap;
use std::time::Duration;

use url::Url;

use crate::errors::{Error, Result};
use crate::model::{UpstreamDefinition, UpstreamTarget};

/// One upstream endpoint with its load-balancing weight.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedEndpoint {
    pub url: Url,
    pub weight: Option<u32>,
}

/// The output of upstream resolution: a deterministic cluster name, the
/// primary URL, every endpoint of the group, and an optional request
/// timeout carried over from the named definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUpstream {
    pub cluster_name: String,
    pub url: Url,
    pub endpoints: Vec<WeightedEndpoint>,
    pub timeout: Option<Duration>,
}

/// Resolve an upstream target against the named definitions.
pub fn resolve(
    target: &UpstreamTarget,
    definitions: &BTreeMap<String, UpstreamDefinition>,
) -> Result<ResolvedUpstream> {
    match (&target.url, &target.ref_name) {
        (Some(url), _) => resolve_inline(url),
        (None, Some(ref_name)) => resolve_ref(ref_name, definitions),
        (None, None) => {
            Err(Error::invalid_upstream("upstream requires either 'url' or 'ref'"))
        }
    }
}

/// Resolve an inline absolute URL. Never carries a timeout.
pub fn resolve_inline(raw: &str) -> Result<ResolvedUpstream> {
    let url = parse_upstream_url(raw)?;
    Ok(ResolvedUpstream {
        cluster_name: cluster_name_for_url(&url),
        endpoints: vec![WeightedEndpoint { url: url.clone(), weight: None }],
        url,
        timeout: None,
    })
}

/// Resolve a reference to a named upstream definition. The first URL of
/// the first urls-group decides the cluster name; weights ride along for
/// load assignment but do not affect selection.
pub fn resolve_ref(
    ref_name: &str,
    definitions: &BTreeMap<String, UpstreamDefinition>,
) -> Result<ResolvedUpstream> {
    let definition =
        definitions.get(ref_name).ok_or_else(|| Error::upstream_ref_not_found(ref_name))?;

    let first = definition
        .urls
        .first()
        .ok_or_else(|| Error::upstream_ref_has_no_urls(ref_name))?;

    let url = parse_upstream_url(&first.url)?;

    let mut endpoints = Vec::with_capacity(definition.urls.len());
    for weighted in &definition.urls {
        endpoints.push(WeightedEndpoint {
            url: parse_upstream_url(&weighted.url)?,
            weight: weighted.weight,
        });
    }

    let timeout = match definition.timeout.as_ref().and_then(|t| t.request.as_deref()) {
        Some(value) if !value.is_empty() => Some(parse_duration(value)?),
        _ => None,
    };

    Ok(ResolvedUpstream { cluster_name: cluster_name_for_url(&url), url, endpoints, timeout })
}

/// Deterministic cluster name: `cluster_{scheme}_{host}` plus `_{port}`
/// when the URL carries an explicit port; dots and colons become
/// underscores. Idempotent by construction.
pub fn cluster_name(scheme: &str, host: &str, port: Option<u16>) -> String {
    let raw = match port {
        Some(port) => format!("cluster_{}_{}_{}", scheme, host, port),
        None => format!("cluster_{}_{}", scheme, host),
    };
    raw.replace(['.', ':'], "_")
}

pub fn cluster_name_for_url(url: &Url) -> String {
    cluster_name(url.scheme(), url.host_str().unwrap_or_default(), url.port())
}

fn parse_upstream_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| Error::invalid_upstream(format!("'{}' is not a valid URL: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::invalid_upstream(format!(
                "unsupported scheme '{}' in '{}'",
                other, raw
            )))
        }
    }

    if url.host_str().is_none() {
        return Err(Error::invalid_upstream(format!("'{}' has no host", raw)));
    }

    Ok(url)
}

/// Parse a human duration string: `500ms`, `30s`, `1m`, `1h`, or a bare
/// number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::invalid_timeout(value, "empty duration"));
    }

    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => value.split_at(split),
        None => (value, "s"),
    };

    let amount: u64 = digits
        .parse()
        .map_err(|_| Error::invalid_timeout(value, "missing numeric component"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        other => Err(Error::invalid_timeout(value, format!("unknown unit '{}'", other))),
    }
}
