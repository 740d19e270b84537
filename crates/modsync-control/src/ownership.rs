//! Ownership tracking for cluster resources.
//!
//! A resource belongs to a module iff it carries the module's provenance
//! label. Ownership is never inferred from names.

use modsync_cluster::{labels, ClusterResource, ClusterStore};
use modsync_core::ModuleName;
use serde_json::{Map, Value};

use crate::error::{ControlError, Result};

/// Returns true if the resource carries `module`'s ownership marker.
#[must_use]
pub fn is_owned_by(resource: &ClusterResource, module: &ModuleName) -> bool {
    resource.label(labels::MODULE) == Some(module.as_str())
}

/// Write `module`'s ownership marker into a manifest's labels.
///
/// # Errors
///
/// Returns `ControlError::MalformedResource` if the manifest, its metadata or
/// its labels are not JSON objects.
pub fn mark(manifest: &mut Value, module: &ModuleName) -> Result<()> {
    let malformed = |what: &str| ControlError::MalformedResource(format!("{what} is not an object"));

    let marks = manifest
        .as_object_mut()
        .ok_or_else(|| malformed("manifest"))?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| malformed("metadata"))?
        .entry("labels")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| malformed("metadata.labels"))?;

    marks.insert(
        labels::MODULE.to_string(),
        Value::String(module.to_string()),
    );
    marks.insert(
        labels::MANAGED_BY.to_string(),
        Value::String(labels::MANAGED_BY_VALUE.to_string()),
    );
    Ok(())
}

/// List every cluster resource owned by `module`, sorted by identity.
///
/// # Errors
///
/// Returns `ControlError::Lookup` if the cluster query fails; partial results
/// are never returned.
pub async fn list_owned(
    cluster: &dyn ClusterStore,
    module: &ModuleName,
) -> Result<Vec<ClusterResource>> {
    let listed = cluster
        .list_by_label(labels::MODULE, module.as_str())
        .await
        .map_err(ControlError::Lookup)?;

    let mut owned: Vec<ClusterResource> = listed
        .into_iter()
        .filter(|resource| {
            let keep = is_owned_by(resource, module);
            if !keep {
                tracing::warn!(
                    module = %module,
                    identity = %resource.identity,
                    "Label query returned a resource without the ownership marker"
                );
            }
            keep
        })
        .collect();
    owned.sort_by(|a, b| a.identity.cmp(&b.identity));

    tracing::debug!(module = %module, count = owned.len(), "Listed owned resources");
    Ok(owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modsync_cluster::MockClusterStore;
    use serde_json::json;

    fn module(name: &str) -> ModuleName {
        ModuleName::new(name).unwrap()
    }

    fn service(name: &str, marks: &Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": name, "namespace": "default", "labels": marks }
        })
    }

    #[test]
    fn marker_decides_ownership() {
        let owned = ClusterResource::from_manifest(service(
            "app",
            &json!({ "modsync.io/module": "app" }),
        ))
        .unwrap();
        let foreign = ClusterResource::from_manifest(service(
            "other",
            &json!({ "modsync.io/module": "billing" }),
        ))
        .unwrap();
        let unmarked = ClusterResource::from_manifest(service("app", &json!({}))).unwrap();

        assert!(is_owned_by(&owned, &module("app")));
        assert!(!is_owned_by(&foreign, &module("app")));
        // Same name as the module, still not owned
        assert!(!is_owned_by(&unmarked, &module("app")));
    }

    #[test]
    fn mark_adds_labels_and_keeps_existing() {
        let mut manifest = service("app", &json!({ "tier": "web" }));
        mark(&mut manifest, &module("app")).unwrap();

        let marks = &manifest["metadata"]["labels"];
        assert_eq!(marks["tier"], json!("web"));
        assert_eq!(marks[labels::MODULE], json!("app"));
        assert_eq!(marks[labels::MANAGED_BY], json!("modsync"));
    }

    #[test]
    fn mark_creates_metadata() {
        let mut manifest = json!({ "apiVersion": "v1", "kind": "ConfigMap" });
        mark(&mut manifest, &module("app")).unwrap();
        assert_eq!(manifest["metadata"]["labels"][labels::MODULE], json!("app"));

        let mut bad = json!({ "metadata": "nope" });
        assert!(matches!(
            mark(&mut bad, &module("app")),
            Err(ControlError::MalformedResource(_))
        ));
    }

    #[tokio::test]
    async fn list_owned_filters_and_sorts() {
        let cluster = MockClusterStore::new();
        cluster.insert(service("zeta", &json!({ "modsync.io/module": "app" })));
        cluster.insert(service("alpha", &json!({ "modsync.io/module": "app" })));
        cluster.insert(service("other", &json!({ "modsync.io/module": "billing" })));

        let owned = list_owned(&cluster, &module("app")).await.unwrap();
        let names: Vec<_> = owned.iter().map(|r| r.identity.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn list_owned_propagates_lookup_failure() {
        let cluster = MockClusterStore::new();
        cluster.fail_lists(true);

        let err = list_owned(&cluster, &module("app")).await.unwrap_err();
        assert!(matches!(err, ControlError::Lookup(_)));
    }
}
