//! Resource identity resolution for rendered manifests.
//!
//! Every rendered manifest is keyed by `(group, version, kind, namespace,
//! name)`. Namespaces are defaulted the way the cluster would: namespaced
//! kinds without one land in the module's namespace, cluster-scoped kinds
//! never carry one. Scope comes from the cluster's discovery data; the
//! built-in list of core cluster-scoped kinds is only consulted for kinds
//! discovery doesn't know.

use std::collections::{BTreeMap, BTreeSet};

use modsync_cluster::{ClusterStore, KindScope};
use modsync_core::{ModuleName, ResourceIdentity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ControlError, Result};
use crate::ownership;

/// Scopes reported by the cluster, keyed by `(apiVersion, kind)`.
pub type KindScopes = BTreeMap<(String, String), KindScope>;

/// Core kinds known to be cluster-scoped, used when discovery has no answer.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "CSIDriver",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PriorityClass",
    "RuntimeClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
    "VolumeAttachment",
];

/// Returns true if `kind` is a well-known cluster-scoped kind.
#[must_use]
pub fn is_cluster_scoped_kind(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// A rendered manifest together with its resolved identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredResource {
    /// Resolved identity.
    pub identity: ResourceIdentity,
    /// The manifest to apply, stamped with namespace and ownership marker.
    pub manifest: Value,
}

/// Ask the cluster how each kind in a render is scoped.
///
/// Manifests without `apiVersion` or `kind` are skipped; resolution rejects
/// them later. A failed lookup leaves the remaining kinds unknown so that a
/// render can still be previewed while the cluster is unreachable.
pub async fn discover_scopes(cluster: &dyn ClusterStore, manifests: &[Value]) -> KindScopes {
    let kinds: BTreeSet<(String, String)> = manifests
        .iter()
        .filter_map(|m| {
            let api_version = m.get("apiVersion").and_then(Value::as_str)?;
            let kind = m.get("kind").and_then(Value::as_str)?;
            Some((api_version.to_string(), kind.to_string()))
        })
        .collect();

    let mut scopes = KindScopes::new();
    for (api_version, kind) in kinds {
        match cluster.kind_scope(&api_version, &kind).await {
            Ok(Some(scope)) => {
                scopes.insert((api_version, kind), scope);
            }
            Ok(None) => {
                tracing::debug!(api_version = %api_version, kind = %kind, "Kind not served by cluster");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Kind discovery failed, falling back to built-in scopes");
                break;
            }
        }
    }
    scopes
}

/// Resolve the identity of a single manifest.
///
/// # Errors
///
/// Returns `ControlError::MalformedResource` if the manifest is not an object
/// or lacks a non-empty `apiVersion`, `kind` or `metadata.name`.
pub fn resolve(
    manifest: &Value,
    default_namespace: &str,
    scopes: &KindScopes,
) -> Result<ResourceIdentity> {
    if !manifest.is_object() {
        return Err(ControlError::MalformedResource(
            "manifest is not an object".to_string(),
        ));
    }

    let field = |pointer: &str| {
        manifest
            .pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ControlError::MalformedResource(format!("missing {pointer}")))
    };

    let api_version = field("/apiVersion")?;
    let kind = field("/kind")?;
    let name = field("/metadata/name")?;

    let cluster_scoped = match scopes.get(&(api_version.to_string(), kind.to_string())) {
        Some(scope) => *scope == KindScope::Cluster,
        None => is_cluster_scoped_kind(kind),
    };

    let namespace = if cluster_scoped {
        ""
    } else {
        manifest
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .unwrap_or(default_namespace)
    };

    let identity = ResourceIdentity::new(api_version, kind, namespace, name);
    if identity.version.is_empty() {
        return Err(ControlError::MalformedResource(format!(
            "invalid apiVersion {api_version:?} on {kind} {name}"
        )));
    }
    Ok(identity)
}

/// Resolve every rendered manifest for a module.
///
/// Each manifest is stamped with its resolved namespace and `module`'s
/// ownership marker, so what is applied matches what was diffed. Order is
/// preserved.
///
/// # Errors
///
/// Returns `ControlError::MalformedResource` if any manifest has no identity
/// or two manifests resolve to the same identity. Nothing is returned for the
/// rest of the render in that case.
pub fn resolve_all(
    manifests: Vec<Value>,
    module: &ModuleName,
    namespace: &str,
    scopes: &KindScopes,
) -> Result<Vec<DesiredResource>> {
    let mut seen = BTreeSet::new();
    let mut resolved = Vec::with_capacity(manifests.len());

    for mut manifest in manifests {
        let identity = resolve(&manifest, namespace, scopes)?;
        if !seen.insert(identity.clone()) {
            return Err(ControlError::MalformedResource(format!(
                "duplicate resource {identity} in render"
            )));
        }

        stamp_namespace(&mut manifest, &identity);
        ownership::mark(&mut manifest, module)?;
        resolved.push(DesiredResource { identity, manifest });
    }

    Ok(resolved)
}

fn stamp_namespace(manifest: &mut Value, identity: &ResourceIdentity) {
    let Some(metadata) = manifest
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    if identity.is_cluster_scoped() {
        metadata.remove("namespace");
    } else {
        metadata.insert(
            "namespace".to_string(),
            Value::String(identity.namespace.clone()),
        );
    }
}
