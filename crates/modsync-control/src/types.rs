//! Request and response types for module operations.
//!
//! Requests are validated before any collaborator is called.

use modsync_core::{validate_dns_label, ContentDigest, ModuleName, ResourceIdentity, VersionToken};
use modsync_store::{ModuleSpec, NewModule, ReconcilePhase, TemplateRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diff::ResourcePartition;
use crate::error::{ControlError, Result};
use crate::identity::DesiredResource;

/// Request to create a new module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateModuleRequest {
    /// Module name (DNS label).
    pub name: String,
    /// Target namespace (DNS label).
    pub namespace: String,
    /// Template location.
    pub template_ref: TemplateRef,
    /// Values passed to the renderer.
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl CreateModuleRequest {
    /// Create a request with empty values.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        template_ref: TemplateRef,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            template_ref,
            values: Map::new(),
        }
    }

    /// Set the values.
    #[must_use]
    pub fn with_values(mut self, values: Map<String, Value>) -> Self {
        self.values = values;
        self
    }

    /// Validate the request and turn it into a store record.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Validation` if the name or namespace is not a
    /// DNS label, the template repository is empty, or the values are too
    /// large.
    pub fn validate(self, config: &ControlConfig) -> Result<NewModule> {
        let name = ModuleName::new(self.name)
            .map_err(|e| ControlError::Validation(format!("name: {e}")))?;
        validate_dns_label(&self.namespace)
            .map_err(|e| ControlError::Validation(format!("namespace: {e}")))?;
        let spec = validate_spec(self.template_ref, self.values, config)?;

        Ok(NewModule {
            name,
            namespace: self.namespace,
            spec,
        })
    }
}

/// Request to replace a module's spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateModuleRequest {
    /// Must match the stored namespace if present.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Template location.
    pub template_ref: TemplateRef,
    /// Values passed to the renderer.
    #[serde(default)]
    pub values: Map<String, Value>,
    /// Token from the last read of the module.
    pub version_token: VersionToken,
}

impl UpdateModuleRequest {
    /// Validate the spec portion of the request.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Validation` if the template repository is empty
    /// or the values are too large.
    pub fn validate_spec(&self, config: &ControlConfig) -> Result<ModuleSpec> {
        validate_spec(self.template_ref.clone(), self.values.clone(), config)
    }
}

pub(crate) fn validate_spec(
    template_ref: TemplateRef,
    values: Map<String, Value>,
    config: &ControlConfig,
) -> Result<ModuleSpec> {
    if template_ref.repo.trim().is_empty() {
        return Err(ControlError::Validation(
            "template_ref.repo must not be empty".to_string(),
        ));
    }

    let size = serde_json::to_vec(&values)
        .map_err(|e| ControlError::Validation(format!("values: {e}")))?
        .len();
    if size > config.max_values_bytes {
        return Err(ControlError::Validation(format!(
            "values are {size} bytes, limit is {}",
            config.max_values_bytes
        )));
    }

    Ok(ModuleSpec {
        template_ref,
        values,
    })
}

/// What an interrupted apply got done.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyProgress {
    /// Resources created.
    pub created: Vec<ResourceIdentity>,
    /// Resources replaced in place.
    pub updated: Vec<ResourceIdentity>,
    /// Resources deleted (including already-gone ones).
    pub deleted: Vec<ResourceIdentity>,
    /// The write that was running when the apply was cancelled or failed.
    /// Its outcome is unknown: a failed request may still have been applied.
    pub in_flight: Option<ResourceIdentity>,
    /// Writes never attempted.
    pub pending: Vec<ResourceIdentity>,
}

impl ApplyProgress {
    /// Number of writes known to have completed.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

/// The result of planning a reconcile, without side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilePlan {
    /// The planned module.
    pub module: ModuleName,
    /// Module generation the plan was rendered from.
    pub generation: u64,
    /// Digest of the desired manifests.
    pub digest: ContentDigest,
    /// Identity partition.
    pub partition: ResourcePartition,
    /// Desired manifests in render order.
    pub desired: Vec<DesiredResource>,
}

/// The outcome of a completed reconcile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// The reconciled module.
    pub module: ModuleName,
    /// Module generation that was applied.
    pub generation: u64,
    /// Final phase.
    pub phase: ReconcilePhase,
    /// Resources created.
    pub created: Vec<ResourceIdentity>,
    /// Resources replaced in place.
    pub updated: Vec<ResourceIdentity>,
    /// Resources deleted.
    pub deleted: Vec<ResourceIdentity>,
    /// Digest of the applied manifests.
    pub digest: ContentDigest,
}

/// One side of a template preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedSet {
    /// Manifests as they would be applied.
    pub manifests: Vec<Value>,
    /// Their identities, in render order.
    pub identities: Vec<ResourceIdentity>,
    /// Digest of `manifests`.
    pub digest: ContentDigest,
}

/// Current and proposed renders of a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatePreview {
    /// Render of the stored spec.
    pub current: RenderedSet,
    /// Render of the proposed spec.
    pub proposed: RenderedSet,
    /// Identity changes going from `current` to `proposed`.
    pub changes: ResourcePartition,
}

/// How a resource relates to the module's current render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    /// Owned and still rendered.
    Live,
    /// Owned but no longer rendered; the next reconcile removes it.
    Deleted,
    /// Rendered but absent from the cluster.
    Missing,
}

/// A resource attributed to a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedResource {
    /// Resource identity.
    pub identity: ResourceIdentity,
    /// Relation to the current render.
    pub state: ResourceState,
    /// The live object, or the desired manifest for `Missing` entries.
    pub manifest: Value,
}

/// A successful render check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// The checked module.
    pub module: ModuleName,
    /// Identities the render produced.
    pub resources: Vec<ResourceIdentity>,
    /// Digest of the render.
    pub digest: ContentDigest,
}

/// Configuration for the module service.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Upper bound on the JSON-encoded size of module values.
    pub max_values_bytes: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_values_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl ControlConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `MAX_VALUES_BYTES`: limit on encoded module values
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MAX_VALUES_BYTES") {
            if let Ok(n) = val.parse() {
                config.max_values_bytes = n;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> TemplateRef {
        TemplateRef::new("https://r", "web", "v1")
    }

    #[test]
    fn create_request_validates() {
        let values = json!({ "image": "nginx" }).as_object().cloned().unwrap();
        let new = CreateModuleRequest::new("app", "default", template())
            .with_values(values.clone())
            .validate(&ControlConfig::default())
            .unwrap();

        assert_eq!(new.name.as_str(), "app");
        assert_eq!(new.namespace, "default");
        assert_eq!(new.spec.values, values);
    }

    #[test]
    fn create_request_rejects_bad_names() {
        let config = ControlConfig::default();

        for (name, ns) in [("App", "default"), ("app", ""), ("-app", "default"), ("app", "ns_1")] {
            let err = CreateModuleRequest::new(name, ns, template())
                .validate(&config)
                .unwrap_err();
            assert!(matches!(err, ControlError::Validation(_)), "{name}/{ns}");
        }
    }

    #[test]
    fn empty_repo_rejected() {
        let err = CreateModuleRequest::new("app", "default", TemplateRef::new(" ", "web", "v1"))
            .validate(&ControlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(msg) if msg.contains("repo")));
    }

    #[test]
    fn oversized_values_rejected() {
        let config = ControlConfig { max_values_bytes: 16 };
        let values = json!({ "blob": "x".repeat(64) }).as_object().cloned().unwrap();

        let err = CreateModuleRequest::new("app", "default", template())
            .with_values(values)
            .validate(&config)
            .unwrap_err();
        assert!(matches!(err, ControlError::Validation(msg) if msg.contains("limit")));
    }

    #[test]
    fn update_request_from_json() {
        let req: UpdateModuleRequest = serde_json::from_value(json!({
            "template_ref": { "repo": "https://r", "path": "web", "version": "v2" },
            "values": { "replicas": 3 },
            "version_token": "abc"
        }))
        .unwrap();

        assert!(req.namespace.is_none());
        assert_eq!(req.version_token.as_str(), "abc");
        let spec = req.validate_spec(&ControlConfig::default()).unwrap();
        assert_eq!(spec.values["replicas"], json!(3));
    }

    #[test]
    fn progress_counts_completed_writes() {
        let id = ResourceIdentity::new("v1", "ConfigMap", "default", "app");
        let progress = ApplyProgress {
            created: vec![id.clone()],
            deleted: vec![id.clone()],
            in_flight: Some(id.clone()),
            pending: vec![id],
            ..ApplyProgress::default()
        };
        assert_eq!(progress.completed(), 2);
    }

    #[test]
    fn resource_state_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ResourceState::Live).unwrap(), json!("live"));
        assert_eq!(serde_json::to_value(ResourceState::Missing).unwrap(), json!("missing"));
    }

    #[test]
    fn default_config() {
        assert_eq!(ControlConfig::default().max_values_bytes, 1_048_576);
    }
}
