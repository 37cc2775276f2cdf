//! Policy chain derivation.
//!
//! For each API the deriver merges API-level and operation-level policy
//! lists, resolves every version selector against the policy definition
//! index, applies system policies through the injector hook, and fans
//! the result out across the same (operation × vhost) grid the
//! translator uses, so both sides agree on route keys.

use chrono::Utc;
use tracing::debug;

use crate::config::RouterConfig;
use crate::errors::{Error, Result};
use crate::model::{
    full_path, route_key, ChainMetadata, ConfigKind, DerivedPolicyChain, PolicyInstance,
    ResolvedPolicy, RoutePolicies, StoredConfig,
};
use crate::storage::PolicyDefinitionIndex;
use crate::xds::translator::effective_vhost;

/// Hook for system-injected policies, applied on top of the merged list
/// of every route.
pub trait PolicyInjector: Send + Sync {
    fn inject(&self, route_key: &str, policies: Vec<ResolvedPolicy>) -> Vec<ResolvedPolicy>;
}

/// Injector that adds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInjector;

impl PolicyInjector for NoopInjector {
    fn inject(&self, _route_key: &str, policies: Vec<ResolvedPolicy>) -> Vec<ResolvedPolicy> {
        policies
    }
}

/// Derive the policy chain for one API configuration. Returns `None`
/// when neither the operations nor the API carry policies and the
/// injector adds none.
pub fn derive(
    config: &StoredConfig,
    index: &dyn PolicyDefinitionIndex,
    injector: &dyn PolicyInjector,
    router: &RouterConfig,
    resource_version: u64,
) -> Result<Option<DerivedPolicyChain>> {
    match config.kind {
        ConfigKind::RestApi | ConfigKind::LlmProvider => {}
        _ => return Ok(None),
    }

    let spec = config.rest_spec()?;

    let main_vhost = effective_vhost(
        spec.vhosts.as_ref().and_then(|v| v.main.as_deref()),
        &router.vhosts.main.default,
    );
    let sandbox_vhost = spec.upstream.sandbox.as_ref().map(|_| {
        effective_vhost(
            spec.vhosts.as_ref().and_then(|v| v.sandbox.as_deref()),
            &router.vhosts.sandbox.default,
        )
    });

    let mut routes = Vec::new();
    let mut any_policies = false;

    for operation in &spec.operations {
        let merged = merge_policies(&operation.policies, &spec.policies);
        let resolved = merged
            .iter()
            .map(|instance| resolve_version(instance, index))
            .collect::<Result<Vec<_>>>()?;

        let path = full_path(&spec.context, &spec.version, &operation.path);

        let mut vhosts = vec![main_vhost.as_str()];
        if let Some(sandbox) = sandbox_vhost.as_deref() {
            vhosts.push(sandbox);
        }

        for vhost in vhosts {
            let key = route_key(&operation.method, &path, vhost);
            let policies = injector.inject(&key, resolved.clone());
            if !policies.is_empty() {
                any_policies = true;
            }
            routes.push(RoutePolicies { route_key: key, policies });
        }
    }

    if !any_policies {
        debug!(config_id = %config.id, "No policies anywhere; skipping chain derivation");
        return Ok(None);
    }

    let now = Utc::now();
    Ok(Some(DerivedPolicyChain {
        routes,
        metadata: ChainMetadata {
            api_name: config.metadata.name.clone(),
            version: spec.version.clone(),
            context: spec.context.clone(),
            created_at: now,
            updated_at: now,
            resource_version,
        },
    }))
}

/// Merge operation-level and API-level policy lists. The operation's
/// list leads in declared order; API-level policies whose names the
/// operation does not mention follow, in API order. An operation with no
/// policies inherits the API list wholesale.
pub fn merge_policies(
    operation_policies: &[PolicyInstance],
    api_policies: &[PolicyInstance],
) -> Vec<PolicyInstance> {
    if operation_policies.is_empty() {
        return api_policies.to_vec();
    }

    let mut merged = operation_policies.to_vec();
    for api_policy in api_policies {
        if !merged.iter().any(|policy| policy.name == api_policy.name) {
            merged.push(api_policy.clone());
        }
    }
    merged
}

/// Resolve a version selector against the definition index.
///
/// A full version must exist verbatim. A major-only selector (`vN`)
/// matches any `vN.x.y` in the index; with several matches the
/// lexicographically greatest wins.
pub fn resolve_version(
    instance: &PolicyInstance,
    index: &dyn PolicyDefinitionIndex,
) -> Result<ResolvedPolicy> {
    let known = index.versions(&instance.name);
    if known.is_empty() {
        return Err(Error::policy_version_unresolved(
            &instance.name,
            &instance.version,
            "policy has no definitions in the index",
        ));
    }

    let selector = instance.version.as_str();

    if is_major_selector(selector) {
        let prefix = format!("{}.", selector);
        let best = known
            .iter()
            .filter(|version| version.starts_with(&prefix))
            .max()
            .cloned()
            .ok_or_else(|| {
                Error::policy_version_unresolved(
                    &instance.name,
                    selector,
                    "no definition matches the major selector",
                )
            })?;
        return Ok(ResolvedPolicy::from_instance(instance, best));
    }

    if known.iter().any(|version| version == selector) {
        return Ok(ResolvedPolicy::from_instance(instance, selector.to_string()));
    }

    Err(Error::policy_version_unresolved(
        &instance.name,
        selector,
        "requested version is not in the definition index",
    ))
}

fn is_major_selector(selector: &str) -> bool {
    let Some(digits) = selector.strip_prefix('v') else { return false };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
