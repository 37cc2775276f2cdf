//! End-to-end translation scenarios exercising the public API:
//! stored configurations in, Envoy resources and policy chains out.

use std::collections::{BTreeMap, HashSet};

use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier,
};
use gateplane::config::GateplaneConfig;
use gateplane::model::{ConfigKind, ConfigMetadata, PolicyInstance, StoredConfig};
use gateplane::policy::{derive, NoopInjector};
use gateplane::storage::InMemoryPolicyIndex;
use gateplane::xds::Translator;
use serde_json::json;

fn stored(id: &str, kind: ConfigKind, spec: serde_json::Value) -> StoredConfig {
    StoredConfig::new(
        id,
        kind,
        ConfigMetadata { name: id.to_string(), version: "v1".into(), labels: Default::default() },
        spec,
    )
}

fn config_with_example_vhosts() -> GateplaneConfig {
    let mut config = GateplaneConfig::default();
    config.router.vhosts.main.default = "api.example.com".into();
    config.router.vhosts.sandbox.default = "sandbox.example.com".into();
    config
}

fn all_route_keys(bundle: &gateplane::xds::ResourceBundle) -> Vec<String> {
    bundle
        .routes
        .iter()
        .filter(|r| r.name == "gateplane_routes")
        .flat_map(|r| r.virtual_hosts.iter())
        .flat_map(|vh| vh.routes.iter().map(|route| route.name.clone()))
        .collect()
}

#[test]
fn version_substitution_shapes_the_route_key() {
    let config = config_with_example_vhosts();
    let translator = Translator::new(config);

    let api = stored(
        "weather",
        ConfigKind::RestApi,
        json!({
            "displayName": "Weather",
            "version": "v1.0",
            "context": "/weather/$version",
            "upstream": { "main": { "url": "http://backend:8080" } },
            "operations": [{ "method": "GET", "path": "/forecast" }]
        }),
    );

    let output = translator.translate(&[api], &BTreeMap::new(), "corr", false).unwrap();
    assert_eq!(all_route_keys(&output.bundle), vec![
        "GET|/weather/v1.0/forecast|api.example.com",
    ]);
}

#[test]
fn sandbox_fan_out_produces_two_entries_with_distinct_clusters() {
    let config = config_with_example_vhosts();
    let translator = Translator::new(config.clone());

    let spec = json!({
        "version": "v1",
        "context": "/",
        "upstream": {
            "main": { "url": "http://backend:8080" },
            "sandbox": { "url": "http://sandbox:8080" }
        },
        "operations": [{
            "method": "GET",
            "path": "/users",
            "policies": [{ "name": "cors", "version": "v0.1.0" }]
        }]
    });
    let api = stored("users", ConfigKind::RestApi, spec);

    // Translator side.
    let output = translator.translate(&[api.clone()], &BTreeMap::new(), "corr", false).unwrap();
    let keys = all_route_keys(&output.bundle);
    assert!(keys.contains(&"GET|/users|api.example.com".to_string()));
    assert!(keys.contains(&"GET|/users|sandbox.example.com".to_string()));

    let cluster_names: HashSet<&str> =
        output.bundle.clusters.iter().map(|c| c.name.as_str()).collect();
    assert!(cluster_names.contains("cluster_http_backend_8080"));
    assert!(cluster_names.contains("cluster_http_sandbox_8080"));

    // Each fan-out route points at its own cluster.
    let mut route_clusters = Vec::new();
    for route_config in &output.bundle.routes {
        for vhost in &route_config.virtual_hosts {
            for route in &vhost.routes {
                if let Some(Action::Route(action)) = &route.action {
                    if let Some(ClusterSpecifier::Cluster(name)) = &action.cluster_specifier {
                        route_clusters.push((route.name.clone(), name.clone()));
                    }
                }
            }
        }
    }
    assert!(route_clusters.contains(&(
        "GET|/users|api.example.com".into(),
        "cluster_http_backend_8080".into()
    )));
    assert!(route_clusters.contains(&(
        "GET|/users|sandbox.example.com".into(),
        "cluster_http_sandbox_8080".into()
    )));

    // Deriver side fans out identically.
    let index = InMemoryPolicyIndex::new();
    index.define("cors", "v0.1.0");
    let chain = derive(&api, &index, &NoopInjector, &config.router, 1).unwrap().unwrap();
    let chain_keys: Vec<&str> = chain.route_keys();
    assert_eq!(chain_keys, vec![
        "GET|/users|api.example.com",
        "GET|/users|sandbox.example.com",
    ]);
}

#[test]
fn translator_and_deriver_agree_on_route_keys() {
    let config = config_with_example_vhosts();
    let translator = Translator::new(config.clone());

    let api = stored(
        "orders",
        ConfigKind::RestApi,
        json!({
            "version": "v2.1",
            "context": "/orders/$version",
            "vhosts": { "main": "orders.example.com" },
            "upstream": {
                "main": { "url": "http://orders:9000" },
                "sandbox": { "url": "http://orders-sandbox:9000" }
            },
            "operations": [
                { "method": "GET", "path": "/all", "policies": [{ "name": "cors", "version": "v1" }] },
                { "method": "POST", "path": "/items/{id}", "policies": [{ "name": "cors", "version": "v1" }] }
            ]
        }),
    );

    let output = translator.translate(&[api.clone()], &BTreeMap::new(), "corr", false).unwrap();
    let translator_keys: HashSet<String> = all_route_keys(&output.bundle).into_iter().collect();

    let index = InMemoryPolicyIndex::new();
    index.define("cors", "v1.4.0");
    let chain = derive(&api, &index, &NoopInjector, &config.router, 1).unwrap().unwrap();
    let deriver_keys: HashSet<String> =
        chain.route_keys().into_iter().map(str::to_string).collect();

    assert_eq!(translator_keys, deriver_keys);
}

#[test]
fn policy_merge_prefers_operation_instance_on_collision() {
    let config = GateplaneConfig::default();

    let api = stored(
        "merge",
        ConfigKind::RestApi,
        json!({
            "version": "v1",
            "context": "/m",
            "upstream": { "main": { "url": "http://backend:8080" } },
            "operations": [{
                "method": "GET",
                "path": "/x",
                "policies": [{ "name": "cors", "version": "v0" }]
            }],
            "policies": [
                { "name": "cors", "version": "v0" },
                { "name": "rate-limit", "version": "v1" }
            ]
        }),
    );

    let index = InMemoryPolicyIndex::new();
    index.define("cors", "v0.3.0");
    index.define("rate-limit", "v1.1.0");

    let chain = derive(&api, &index, &NoopInjector, &config.router, 1).unwrap().unwrap();
    let policies: Vec<(&str, &str)> = chain.routes[0]
        .policies
        .iter()
        .map(|p| (p.name.as_str(), p.version.as_str()))
        .collect();
    assert_eq!(policies, vec![("cors", "v0.3.0"), ("rate-limit", "v1.1.0")]);
}

#[test]
fn policy_merge_order_is_operation_then_api_extras() {
    let operation = vec![
        PolicyInstance::new("b", "v1"),
        PolicyInstance::new("a", "v1"),
    ];
    let api = vec![
        PolicyInstance::new("c", "v1"),
        PolicyInstance::new("a", "v2"),
        PolicyInstance::new("d", "v1"),
    ];
    let merged = gateplane::policy::merge_policies(&operation, &api);
    let names: Vec<&str> = merged.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["b", "a", "c", "d"]);
    // The operation's `a` survives, not the API's.
    assert_eq!(merged[1].version, "v1");
}

#[test]
fn invalid_upstream_is_isolated_to_its_config() {
    let translator = Translator::new(GateplaneConfig::default());

    let invalid = stored(
        "broken",
        ConfigKind::RestApi,
        json!({
            "version": "v1",
            "context": "/broken",
            "upstream": { "main": { "url": "::: not a url" } },
            "operations": [{ "method": "GET", "path": "/x" }]
        }),
    );
    let valid = stored(
        "healthy",
        ConfigKind::RestApi,
        json!({
            "version": "v1",
            "context": "/healthy",
            "upstream": { "main": { "url": "http://backend:8080" } },
            "operations": [{ "method": "GET", "path": "/x" }]
        }),
    );

    let output = translator
        .translate(&[invalid, valid], &BTreeMap::new(), "corr", false)
        .unwrap();

    assert_eq!(output.failed, vec!["broken"]);
    let keys = all_route_keys(&output.bundle);
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("GET|/healthy/x|"));
    output.bundle.verify_consistency().unwrap();
}

#[test]
fn cluster_names_are_unique_and_routes_are_closed_over_them() {
    let translator = Translator::new(GateplaneConfig::default());

    // Two APIs sharing a backend, one with its own.
    let configs = vec![
        stored(
            "a",
            ConfigKind::RestApi,
            json!({
                "version": "v1",
                "context": "/a",
                "upstream": { "main": { "url": "http://shared:8080" } },
                "operations": [{ "method": "GET", "path": "/x" }]
            }),
        ),
        stored(
            "b",
            ConfigKind::RestApi,
            json!({
                "version": "v1",
                "context": "/b",
                "upstream": { "main": { "url": "http://shared:8080" } },
                "operations": [{ "method": "POST", "path": "/y" }]
            }),
        ),
        stored(
            "c",
            ConfigKind::RestApi,
            json!({
                "version": "v1",
                "context": "/c",
                "upstream": { "main": { "url": "https://own.example.com:8443" } },
                "operations": [{ "method": "GET", "path": "/z" }]
            }),
        ),
    ];

    let output = translator.translate(&configs, &BTreeMap::new(), "corr", false).unwrap();

    let mut seen = HashSet::new();
    for cluster in &output.bundle.clusters {
        assert!(seen.insert(cluster.name.clone()), "duplicate cluster {}", cluster.name);
    }
    assert!(seen.contains("cluster_http_shared_8080"));
    assert!(seen.contains("cluster_https_own_example_com_8443"));

    output.bundle.verify_consistency().unwrap();
}

#[test]
fn translating_twice_is_byte_identical() {
    let translator = Translator::new(GateplaneConfig::default());
    let configs = vec![stored(
        "det",
        ConfigKind::RestApi,
        json!({
            "version": "v1",
            "context": "/det",
            "upstream": { "main": { "url": "http://backend:8080" } },
            "operations": [
                { "method": "GET", "path": "/one" },
                { "method": "GET", "path": "/two/{id}" }
            ]
        }),
    )];

    let first = translator.translate(&configs, &BTreeMap::new(), "c1", false).unwrap();
    let second = translator.translate(&configs, &BTreeMap::new(), "c2", false).unwrap();

    // Typed comparison: identical inputs yield identical resources,
    // independent of the correlation id.
    assert_eq!(first.bundle.clusters, second.bundle.clusters);
    assert_eq!(first.bundle.endpoints, second.bundle.endpoints);
    assert_eq!(first.bundle.listeners, second.bundle.listeners);
    assert_eq!(first.bundle.routes, second.bundle.routes);

    // And the cluster and listener encodings are byte-identical too.
    let a = first.bundle.built_resources();
    let b = second.bundle.built_resources();
    for type_url in [
        "type.googleapis.com/envoy.config.cluster.v3.Cluster",
        "type.googleapis.com/envoy.config.listener.v3.Listener",
        "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment",
    ] {
        assert_eq!(a[type_url], b[type_url], "bytes differ for {type_url}");
    }
}

#[test]
fn upstream_ref_timeout_reaches_the_route() {
    use gateplane::model::{UpstreamDefinition, UpstreamTimeout, WeightedUrl};

    let translator = Translator::new(GateplaneConfig::default());
    let mut definitions = BTreeMap::new();
    definitions.insert(
        "billing".to_string(),
        UpstreamDefinition {
            urls: vec![WeightedUrl { url: "http://billing:8080".into(), weight: None }],
            timeout: Some(UpstreamTimeout { request: Some("30s".into()) }),
        },
    );

    let api = stored(
        "billing-api",
        ConfigKind::RestApi,
        json!({
            "version": "v1",
            "context": "/billing",
            "upstream": { "main": { "ref": "billing" } },
            "operations": [{ "method": "GET", "path": "/invoices" }]
        }),
    );

    let output = translator.translate(&[api], &definitions, "corr", false).unwrap();
    let route = output
        .bundle
        .routes
        .iter()
        .flat_map(|r| r.virtual_hosts.iter())
        .flat_map(|vh| vh.routes.iter())
        .find(|route| route.name.contains("/billing/invoices"))
        .expect("route present");

    match route.action.as_ref().unwrap() {
        Action::Route(action) => {
            assert_eq!(action.timeout.as_ref().unwrap().seconds, 30);
        }
        other => panic!("expected route action, got {:?}", other),
    }
}
