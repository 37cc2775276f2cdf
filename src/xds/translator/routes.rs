//! Route construction for API operations.
//!
//! Every operation becomes one Envoy route per effective virtual host.
//! The route name doubles as the route key (`METHOD|path|vhost`) so the
//! router and the Policy Engine agree on identities.

use std::collections::HashMap;

use envoy_types::pb::envoy::config::core::v3::{HeaderValue, Metadata};
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, route::Action, route_action::ClusterSpecifier,
    route_match::PathSpecifier, HeaderMatcher, Route, RouteAction, RouteMatch,
};
use envoy_types::pb::envoy::extensions::filters::http::ext_proc::v3::{
    ext_proc_per_route::Override, ExtProcOverrides, ExtProcPerRoute,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, RegexMatcher, StringMatcher,
};
use envoy_types::pb::google::protobuf::{
    value::Kind, Any, Duration as ProtoDuration, Struct as ProstStruct, Value as ProstValue,
};
use prost::Message;

use crate::xds::resources::ROUTE_METADATA_NAMESPACE;

/// Name of the ext_proc HTTP filter in the chain; per-route overrides key
/// off it.
pub const EXT_PROC_FILTER_NAME: &str = "envoy.filters.http.ext_proc";
/// gRPC metadata header carrying the route key to the Policy Engine.
pub const ROUTE_KEY_METADATA_HEADER: &str = "x-gateplane-route-key";

const EXT_PROC_PER_ROUTE_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.ext_proc.v3.ExtProcPerRoute";

/// Path match specifier, modeled explicitly rather than as a shared
/// string field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatch {
    Exact(String),
    Regex(String),
    Prefix(String),
    None,
}

impl PathMatch {
    fn to_path_specifier(&self) -> Option<PathSpecifier> {
        match self {
            PathMatch::Exact(path) => Some(PathSpecifier::Path(path.clone())),
            PathMatch::Regex(pattern) => Some(PathSpecifier::SafeRegex(RegexMatcher {
                regex: pattern.clone(),
                ..Default::default()
            })),
            PathMatch::Prefix(prefix) => Some(PathSpecifier::Prefix(prefix.clone())),
            PathMatch::None => None,
        }
    }
}

/// Choose the matcher shape for a full operation path: exact when the
/// path carries no templated segments, anchored regex otherwise.
pub fn matcher_for_path(full_path: &str) -> PathMatch {
    if full_path.contains('{') {
        PathMatch::Regex(path_to_regex(full_path))
    } else {
        PathMatch::Exact(full_path.to_string())
    }
}

/// Convert a templated path to an anchored regex: each `{name}` segment
/// becomes `[^/]+` and literal dots are escaped.
pub fn path_to_regex(path: &str) -> String {
    let mut pattern = String::with_capacity(path.len() + 8);
    pattern.push('^');

    let mut rest = path;
    while let Some(open) = rest.find('{') {
        let (literal, remainder) = rest.split_at(open);
        pattern.push_str(&escape_literal(literal));
        match remainder.find('}') {
            Some(close) => {
                pattern.push_str("[^/]+");
                rest = &remainder[close + 1..];
            }
            None => {
                // Unbalanced brace: treat the remainder as a literal.
                pattern.push_str(&escape_literal(remainder));
                rest = "";
            }
        }
    }
    pattern.push_str(&escape_literal(rest));
    pattern.push('$');
    pattern
}

fn escape_literal(literal: &str) -> String {
    literal.replace('.', "\\.")
}

/// Route metadata attached under the `gateplane.api` filter-metadata
/// namespace.
#[derive(Debug, Clone, Default)]
pub struct RouteMeta {
    pub api_id: String,
    pub api_name: String,
    pub api_version: String,
    pub context: String,
    pub method: String,
    pub vhost: String,
    pub kind: String,
    pub project_id: Option<String>,
    pub template: Option<String>,
    pub provider: Option<String>,
}

/// Everything needed to build one route.
#[derive(Debug, Clone)]
pub struct RouteParams {
    pub route_key: String,
    pub path_match: PathMatch,
    pub method: String,
    pub cluster: String,
    pub timeout: Option<std::time::Duration>,
    pub meta: RouteMeta,
    pub policy_engine_enabled: bool,
}

/// Build one Envoy route from its parameters.
pub fn build_route(params: RouteParams) -> Route {
    let route_match = RouteMatch {
        path_specifier: params.path_match.to_path_specifier(),
        headers: vec![method_matcher(&params.method)],
        ..Default::default()
    };

    let action = RouteAction {
        cluster_specifier: Some(ClusterSpecifier::Cluster(params.cluster.clone())),
        timeout: params.timeout.map(|timeout| ProtoDuration {
            seconds: timeout.as_secs() as i64,
            nanos: timeout.subsec_nanos() as i32,
        }),
        ..Default::default()
    };

    let mut route = Route {
        name: params.route_key.clone(),
        r#match: Some(route_match),
        action: Some(Action::Route(action)),
        metadata: Some(route_metadata(&params.meta)),
        ..Default::default()
    };

    if params.policy_engine_enabled {
        route.typed_per_filter_config =
            HashMap::from([(EXT_PROC_FILTER_NAME.to_string(), ext_proc_per_route(&params.route_key))]);
    }

    route
}

fn method_matcher(method: &str) -> HeaderMatcher {
    HeaderMatcher {
        name: ":method".to_string(),
        header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
            match_pattern: Some(MatchPattern::Exact(method.to_uppercase())),
            ignore_case: false,
        })),
        ..Default::default()
    }
}

/// Per-route ext_proc override: tags the stream towards the Policy
/// Engine with the route key so the engine can select the right chain.
fn ext_proc_per_route(route_key: &str) -> Any {
    let per_route = ExtProcPerRoute {
        r#override: Some(Override::Overrides(ExtProcOverrides {
            grpc_initial_metadata: vec![HeaderValue {
                key: ROUTE_KEY_METADATA_HEADER.to_string(),
                value: route_key.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        })),
    };

    Any { type_url: EXT_PROC_PER_ROUTE_TYPE_URL.to_string(), value: per_route.encode_to_vec() }
}

fn route_metadata(meta: &RouteMeta) -> Metadata {
    let mut fields = std::collections::BTreeMap::from([
        ("apiId".to_string(), meta.api_id.clone()),
        ("apiName".to_string(), meta.api_name.clone()),
        ("apiVersion".to_string(), meta.api_version.clone()),
        ("context".to_string(), meta.context.clone()),
        ("method".to_string(), meta.method.clone()),
        ("vhost".to_string(), meta.vhost.clone()),
        ("kind".to_string(), meta.kind.clone()),
    ]);
    if let Some(project_id) = &meta.project_id {
        fields.insert("projectId".to_string(), project_id.clone());
    }
    if let Some(template) = &meta.template {
        fields.insert("template".to_string(), template.clone());
    }
    if let Some(provider) = &meta.provider {
        fields.insert("provider".to_string(), provider.clone());
    }

    let entries = fields
        .into_iter()
        .map(|(key, value)| (key, ProstValue { kind: Some(Kind::StringValue(value)) }))
        .collect();

    Metadata {
        filter_metadata: HashMap::from([(
            ROUTE_METADATA_NAMESPACE.to_string(),
            ProstStruct { fields: entries },
        )]),
        ..Default::default()
    }
}
