//! Types for the cluster crate.

use std::collections::BTreeMap;

use modsync_core::ResourceIdentity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ClusterError, Result};

/// Label keys written onto every resource a module owns.
pub mod labels {
    /// Provenance marker; the value is the owning module's name.
    pub const MODULE: &str = "modsync.io/module";

    /// Informational marker naming the managing tool.
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

    /// Value written under [`MANAGED_BY`].
    pub const MANAGED_BY_VALUE: &str = "modsync";
}

/// Whether objects of a kind live inside a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindScope {
    /// Objects carry a namespace.
    Namespaced,
    /// Objects are cluster-wide and never carry a namespace.
    Cluster,
}

/// A resource as it exists in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResource {
    /// Identity derived from the live object.
    pub identity: ResourceIdentity,
    /// The live object as JSON.
    pub manifest: Value,
}

impl ClusterResource {
    /// Build a resource from a live object, reading its identity from
    /// `apiVersion`, `kind` and `metadata`.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InvalidManifest` if `apiVersion`, `kind` or
    /// `metadata.name` is missing.
    pub fn from_manifest(manifest: Value) -> Result<Self> {
        let identity = identity_of(&manifest)?;
        Ok(Self { identity, manifest })
    }

    /// Look up a label value on the object.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.manifest
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(key))
            .and_then(Value::as_str)
    }

    /// All string labels on the object.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.manifest
            .pointer("/metadata/labels")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The object's UID, if the cluster assigned one.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.manifest
            .pointer("/metadata/uid")
            .and_then(Value::as_str)
    }
}

/// Read the identity of an object exactly as written, without defaulting.
///
/// # Errors
///
/// Returns `ClusterError::InvalidManifest` if a required field is missing.
pub fn identity_of(manifest: &Value) -> Result<ResourceIdentity> {
    let field = |pointer: &str| {
        manifest
            .pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClusterError::InvalidManifest(format!("missing {pointer}")))
    };

    let api_version = field("/apiVersion")?;
    let kind = field("/kind")?;
    let name = field("/metadata/name")?;
    let namespace = manifest
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(ResourceIdentity::new(api_version, kind, namespace, name))
}

/// Configuration for cluster access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Field manager name sent with create and replace requests.
    pub field_manager: String,
    /// API groups never scanned when listing owned resources.
    pub skip_api_groups: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            field_manager: "modsync".to_string(),
            skip_api_groups: vec!["metrics.k8s.io".to_string(), "events.k8s.io".to_string()],
        }
    }
}

impl ClusterConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `FIELD_MANAGER`: field manager name for writes
    /// - `SKIP_API_GROUPS`: comma-separated API groups to skip when listing
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FIELD_MANAGER") {
            if !val.is_empty() {
                config.field_manager = val;
            }
        }
        if let Ok(val) = std::env::var("SKIP_API_GROUPS") {
            config.skip_api_groups = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        config
    }

    /// Whether listing should skip the given API group.
    #[must_use]
    pub fn skips_group(&self, group: &str) -> bool {
        self.skip_api_groups.iter().any(|g| g == group)
    }
}
