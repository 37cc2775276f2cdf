//! The xDS translator: stored configurations in, Envoy resources out.
//!
//! Translation is state-of-the-world: every call rebuilds the complete
//! resource bundle from the full configuration set. Configurations that
//! individually fail are logged and skipped; only systemic failures
//! (listener synthesis, access-log misconfiguration, a malformed event
//! gateway URL) abort the call.

pub mod access_log;
pub mod clusters;
pub mod listeners;
pub mod routes;
pub mod tls;

use std::collections::{BTreeMap, HashMap, HashSet};

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, route_match::PathSpecifier, Route,
    RouteConfiguration, RouteMatch, VirtualHost,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::Secret;
use tracing::{debug, warn};

use crate::config::GateplaneConfig;
use crate::errors::{Error, Result};
use crate::model::{full_path, route_key, ConfigKind, StoredConfig, UpstreamDefinition};
use crate::xds::resources::{
    BuiltResource, CLUSTER_TYPE_URL, DYNAMIC_FORWARD_PROXY_CLUSTER, DYNAMIC_ROUTE_CONFIG,
    ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, MAIN_ROUTE_CONFIG, OTEL_COLLECTOR_CLUSTER,
    ROUTE_TYPE_URL, SECRET_TYPE_URL, WEBSUB_HUB_CLUSTER, WEBSUB_ROUTE_CONFIG,
};
use crate::xds::route_sort::sort_routes;
use crate::xds::upstream::{self, ResolvedUpstream};

use routes::{build_route, matcher_for_path, RouteMeta, RouteParams};

/// The complete, typed resource set for one translation pass.
#[derive(Debug, Clone, Default)]
pub struct ResourceBundle {
    pub clusters: Vec<Cluster>,
    pub endpoints: Vec<ClusterLoadAssignment>,
    pub listeners: Vec<Listener>,
    pub routes: Vec<RouteConfiguration>,
    pub secrets: Vec<Secret>,
}

impl ResourceBundle {
    /// Every cluster a route names must exist, and cluster names must be
    /// unique. Violations refuse the snapshot.
    pub fn verify_consistency(&self) -> Result<()> {
        let mut cluster_names = HashSet::new();
        for cluster in &self.clusters {
            if !cluster_names.insert(cluster.name.as_str()) {
                return Err(Error::snapshot_inconsistent(format!(
                    "duplicate cluster '{}'",
                    cluster.name
                )));
            }
        }

        for route_config in &self.routes {
            for vhost in &route_config.virtual_hosts {
                for route in &vhost.routes {
                    if let Some(Action::Route(action)) = &route.action {
                        if let Some(ClusterSpecifier::Cluster(name)) = &action.cluster_specifier {
                            if !cluster_names.contains(name.as_str()) {
                                return Err(Error::snapshot_inconsistent(format!(
                                    "route '{}' references unknown cluster '{}'",
                                    route.name, name
                                )));
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Encode into the per-type resource lists a snapshot carries.
    pub fn built_resources(&self) -> HashMap<&'static str, Vec<BuiltResource>> {
        let mut resources = HashMap::new();

        resources.insert(
            CLUSTER_TYPE_URL,
            self.clusters
                .iter()
                .map(|c| BuiltResource::encode(c.name.clone(), CLUSTER_TYPE_URL, c))
                .collect(),
        );
        resources.insert(
            ENDPOINT_TYPE_URL,
            self.endpoints
                .iter()
                .map(|e| BuiltResource::encode(e.cluster_name.clone(), ENDPOINT_TYPE_URL, e))
                .collect(),
        );
        resources.insert(
            LISTENER_TYPE_URL,
            self.listeners
                .iter()
                .map(|l| BuiltResource::encode(l.name.clone(), LISTENER_TYPE_URL, l))
                .collect(),
        );
        resources.insert(
            ROUTE_TYPE_URL,
            self.routes
                .iter()
                .map(|r| BuiltResource::encode(r.name.clone(), ROUTE_TYPE_URL, r))
                .collect(),
        );
        resources.insert(
            SECRET_TYPE_URL,
            self.secrets
                .iter()
                .map(|s| BuiltResource::encode(s.name.clone(), SECRET_TYPE_URL, s))
                .collect(),
        );

        resources
    }
}

/// Result of one translation pass: the bundle plus the ids of
/// configurations that were skipped.
#[derive(Debug, Clone, Default)]
pub struct TranslateOutput {
    pub bundle: ResourceBundle,
    pub failed: Vec<String>,
}

/// What one configuration contributes to the bundle.
#[derive(Debug, Clone, Default)]
struct Contribution {
    clusters: Vec<Cluster>,
    /// (vhost domain, route) pairs destined for the main route config.
    routes: Vec<(String, Route)>,
    /// Routes destined for the internal WebSub route config.
    websub_routes: Vec<Route>,
}

/// Compiles stored configurations plus router configuration into Envoy
/// resources. Holds no mutable state; every translation starts from
/// scratch.
#[derive(Debug, Clone)]
pub struct Translator {
    config: GateplaneConfig,
}

impl Translator {
    pub fn new(config: GateplaneConfig) -> Self {
        Self { config }
    }

    /// Translate the full configuration set. `ca_bundle_available`
    /// decides whether https upstream clusters validate against the SDS
    /// CA bundle or fall back to system trust.
    pub fn translate(
        &self,
        configs: &[StoredConfig],
        definitions: &BTreeMap<String, UpstreamDefinition>,
        correlation_id: &str,
        ca_bundle_available: bool,
    ) -> Result<TranslateOutput> {
        let router = &self.config.router;

        let mut failed = Vec::new();
        let mut clusters: Vec<Cluster> = Vec::new();
        let mut cluster_names: HashSet<String> = HashSet::new();
        let mut routes_by_vhost: BTreeMap<String, Vec<Route>> = BTreeMap::new();
        let mut websub_routes: Vec<Route> = Vec::new();

        for config in configs {
            match self.translate_one(config, definitions, ca_bundle_available) {
                Ok(contribution) => {
                    for cluster in contribution.clusters {
                        if cluster_names.insert(cluster.name.clone()) {
                            clusters.push(cluster);
                        }
                    }
                    for (vhost, route) in contribution.routes {
                        routes_by_vhost.entry(vhost).or_default().push(route);
                    }
                    websub_routes.extend(contribution.websub_routes);
                }
                Err(error) if !error.is_bundle_fatal() => {
                    warn!(
                        config_id = %config.id,
                        correlation_id = %correlation_id,
                        error = %error,
                        "Skipping configuration that failed translation"
                    );
                    failed.push(config.id.clone());
                }
                Err(error) => return Err(error),
            }
        }

        // Infrastructure clusters. The SDS cluster is always present so
        // TLS contexts can resolve their secret references.
        let mut infra = vec![clusters::sds_cluster(&self.config.xds)];
        if router.policy_engine.enabled {
            infra.push(clusters::policy_engine_cluster(router)?);
        }
        if router.tracing.enabled {
            infra.push(clusters::otel_collector_cluster(
                OTEL_COLLECTOR_CLUSTER,
                &router.tracing.endpoint,
            )?);
        }
        if router.analytics.grpc_access_log_enabled {
            infra.push(clusters::access_log_sink_cluster(
                crate::xds::resources::ACCESS_LOG_SINK_CLUSTER,
                &router.analytics.host,
                router.analytics.als_server_port,
            ));
        }
        if router.event_gateway.enabled {
            infra.push(clusters::dynamic_forward_proxy_cluster());
            infra.push(self.websub_hub_cluster(ca_bundle_available)?);
        }
        for cluster in infra {
            if cluster_names.insert(cluster.name.clone()) {
                clusters.push(cluster);
            }
        }

        let mut route_configs = vec![main_route_config(routes_by_vhost)];
        if router.event_gateway.enabled {
            route_configs.push(websub_route_config(websub_routes));
            route_configs.push(dynamic_route_config());
        }

        let endpoints = clusters
            .iter()
            .filter_map(clusters::load_assignment_of)
            .collect();

        let bundle = ResourceBundle {
            listeners: listeners::build_listeners(router)?,
            routes: route_configs,
            clusters,
            endpoints,
            secrets: Vec::new(),
        };

        debug!(
            correlation_id = %correlation_id,
            clusters = bundle.clusters.len(),
            listeners = bundle.listeners.len(),
            route_configs = bundle.routes.len(),
            skipped = failed.len(),
            "Translation pass complete"
        );

        Ok(TranslateOutput { bundle, failed })
    }

    fn translate_one(
        &self,
        config: &StoredConfig,
        definitions: &BTreeMap<String, UpstreamDefinition>,
        ca_bundle_available: bool,
    ) -> Result<Contribution> {
        match config.kind {
            ConfigKind::RestApi | ConfigKind::LlmProvider => {
                self.translate_api(config, definitions, ca_bundle_available)
            }
            ConfigKind::WebSubApi => self.translate_websub(config),
            // Templates carry no data-plane footprint of their own.
            ConfigKind::LlmProviderTemplate => Ok(Contribution::default()),
        }
    }

    fn translate_api(
        &self,
        config: &StoredConfig,
        definitions: &BTreeMap<String, UpstreamDefinition>,
        ca_bundle_available: bool,
    ) -> Result<Contribution> {
        let router = &self.config.router;
        let spec = config.rest_spec()?;

        let main_target = spec
            .upstream
            .main
            .as_ref()
            .ok_or_else(|| Error::invalid_upstream("API declares no main upstream"))?;
        let main_upstream = upstream::resolve(main_target, definitions)?;

        let sandbox_upstream = spec
            .upstream
            .sandbox
            .as_ref()
            .map(|target| upstream::resolve(target, definitions))
            .transpose()?;

        let mut contribution = Contribution::default();
        contribution.clusters.push(clusters::upstream_cluster(&main_upstream, ca_bundle_available));
        if let Some(sandbox) = &sandbox_upstream {
            contribution.clusters.push(clusters::upstream_cluster(sandbox, ca_bundle_available));
        }

        let main_vhost = effective_vhost(
            spec.vhosts.as_ref().and_then(|v| v.main.as_deref()),
            &router.vhosts.main.default,
        );
        let sandbox_vhost = effective_vhost(
            spec.vhosts.as_ref().and_then(|v| v.sandbox.as_deref()),
            &router.vhosts.sandbox.default,
        );

        for operation in &spec.operations {
            let path = full_path(&spec.context, &spec.version, &operation.path);
            let path_match = matcher_for_path(&path);

            let mut targets: Vec<(&str, &ResolvedUpstream)> =
                vec![(main_vhost.as_str(), &main_upstream)];
            if let Some(sandbox) = &sandbox_upstream {
                targets.push((sandbox_vhost.as_str(), sandbox));
            }

            for (vhost, resolved) in targets {
                let key = route_key(&operation.method, &path, vhost);
                let route = build_route(RouteParams {
                    route_key: key,
                    path_match: path_match.clone(),
                    method: operation.method.clone(),
                    cluster: resolved.cluster_name.clone(),
                    timeout: resolved.timeout,
                    meta: RouteMeta {
                        api_id: config.id.clone(),
                        api_name: config.metadata.name.clone(),
                        api_version: spec.version.clone(),
                        context: spec.context.clone(),
                        method: operation.method.to_uppercase(),
                        vhost: vhost.to_string(),
                        kind: config.kind.as_str().to_string(),
                        project_id: config.metadata.project_id().map(str::to_string),
                        template: config.template_handle().map(str::to_string),
                        provider: config.provider_name().map(str::to_string),
                    },
                    policy_engine_enabled: router.policy_engine.enabled,
                });
                contribution.routes.push((vhost.to_string(), route));
            }
        }

        Ok(contribution)
    }

    fn translate_websub(&self, config: &StoredConfig) -> Result<Contribution> {
        let spec = config.web_sub_spec()?;
        let mut contribution = Contribution::default();

        if !self.config.router.event_gateway.enabled {
            return Ok(contribution);
        }

        for operation in &spec.operations {
            let path = full_path(&spec.context, &spec.version, &operation.path);
            let key = route_key(&operation.method, &path, "*");
            let route = build_route(RouteParams {
                route_key: key,
                path_match: matcher_for_path(&path),
                method: operation.method.clone(),
                cluster: WEBSUB_HUB_CLUSTER.to_string(),
                timeout: None,
                meta: RouteMeta {
                    api_id: config.id.clone(),
                    api_name: config.metadata.name.clone(),
                    api_version: spec.version.clone(),
                    context: spec.context.clone(),
                    method: operation.method.to_uppercase(),
                    vhost: "*".to_string(),
                    kind: config.kind.as_str().to_string(),
                    project_id: config.metadata.project_id().map(str::to_string),
                    template: None,
                    provider: None,
                },
                policy_engine_enabled: self.config.router.policy_engine.enabled,
            });
            contribution.websub_routes.push(route);
        }

        Ok(contribution)
    }

    /// Cluster towards the external WebSub hub. A malformed hub URL is a
    /// systemic failure when the event gateway is enabled.
    fn websub_hub_cluster(&self, ca_bundle_available: bool) -> Result<Cluster> {
        let hub_url = &self.config.router.event_gateway.web_sub_hub_url;
        let resolved = upstream::resolve_inline(hub_url)
            .map_err(|e| Error::config(format!("event gateway hub URL is invalid: {}", e)))?;

        let mut cluster = clusters::upstream_cluster(&resolved, ca_bundle_available);
        cluster.name = WEBSUB_HUB_CLUSTER.to_string();
        if let Some(assignment) = cluster.load_assignment.as_mut() {
            assignment.cluster_name = WEBSUB_HUB_CLUSTER.to_string();
        }
        Ok(cluster)
    }
}

/// Spec vhost if present and non-empty, router default otherwise.
pub fn effective_vhost(declared: Option<&str>, default: &str) -> String {
    match declared {
        Some(vhost) if !vhost.is_empty() => vhost.to_string(),
        _ => default.to_string(),
    }
}

fn main_route_config(routes_by_vhost: BTreeMap<String, Vec<Route>>) -> RouteConfiguration {
    let virtual_hosts = routes_by_vhost
        .into_iter()
        .map(|(domain, routes)| VirtualHost {
            name: domain.clone(),
            domains: vec![domain],
            routes: sort_routes(routes),
            ..Default::default()
        })
        .collect();

    RouteConfiguration {
        name: MAIN_ROUTE_CONFIG.to_string(),
        virtual_hosts,
        ..Default::default()
    }
}

fn websub_route_config(routes: Vec<Route>) -> RouteConfiguration {
    RouteConfiguration {
        name: WEBSUB_ROUTE_CONFIG.to_string(),
        virtual_hosts: vec![VirtualHost {
            name: "websub".to_string(),
            domains: vec!["*".to_string()],
            routes: sort_routes(routes),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Catch-all route config for the dynamic-forward-proxy listeners.
fn dynamic_route_config() -> RouteConfiguration {
    let route = Route {
        name: "dynamic_forward".to_string(),
        r#match: Some(RouteMatch {
            path_specifier: Some(PathSpecifier::Prefix("/".to_string())),
            ..Default::default()
        }),
        action: Some(Action::Route(
            envoy_types::pb::envoy::config::route::v3::RouteAction {
                cluster_specifier: Some(ClusterSpecifier::Cluster(
                    DYNAMIC_FORWARD_PROXY_CLUSTER.to_string(),
                )),
                ..Default::default()
            },
        )),
        ..Default::default()
    };

    RouteConfiguration {
        name: DYNAMIC_ROUTE_CONFIG.to_string(),
        virtual_hosts: vec![VirtualHost {
            name: "dynamic".to_string(),
            domains: vec!["*".to_string()],
            routes: vec![route],
            ..Default::default()
        }],
        ..Default::default()
    }
}
