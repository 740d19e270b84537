//! Domain types stored in the database.
//!
//! These types represent the persisted state of modules and their last
//! reconciliation outcome.

use chrono::{DateTime, Utc};
use modsync_core::{ModuleName, VersionToken};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A module record stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module name, immutable after creation.
    pub name: ModuleName,
    /// Namespace the module's resources default to, immutable after creation.
    pub namespace: String,
    /// User-authored desired state.
    pub spec: ModuleSpec,
    /// Optimistic-concurrency token, replaced on every spec write.
    pub version_token: VersionToken,
    /// Incremented on every spec write, starting at 1.
    pub generation: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last spec modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Outcome of the last reconciliation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ModuleStatus>,
}

/// The user-authored part of a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Template this module instantiates.
    pub template_ref: TemplateRef,
    /// Values passed verbatim to the renderer.
    #[serde(default)]
    pub values: Map<String, Value>,
}

/// A pointer to a template definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TemplateRef {
    /// Repository location, e.g. a raw-file base URL.
    pub repo: String,
    /// Path of the template inside the repository.
    #[serde(default)]
    pub path: String,
    /// Version or git ref. Empty means the store's default version.
    #[serde(default)]
    pub version: String,
}

impl TemplateRef {
    /// Create a template reference.
    #[must_use]
    pub fn new(
        repo: impl Into<String>,
        path: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            path: path.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repo.trim_end_matches('/'))?;
        if !self.path.is_empty() {
            write!(f, "/{}", self.path.trim_matches('/'))?;
        }
        if !self.version.is_empty() {
            write!(f, "@{}", self.version)?;
        }
        Ok(())
    }
}

/// A module to be inserted; the store assigns token, generation and timestamps.
#[derive(Debug, Clone)]
pub struct NewModule {
    /// Module name.
    pub name: ModuleName,
    /// Target namespace.
    pub namespace: String,
    /// Initial spec.
    pub spec: ModuleSpec,
}

/// Phases of a single reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ReconcilePhase {
    /// Rendering the template with the module's values.
    Rendering = 1,
    /// Comparing desired and owned resources.
    Diffing = 2,
    /// Creating, updating and deleting cluster resources.
    Applying = 3,
    /// Run finished successfully.
    Settled = 4,
    /// Run aborted.
    Failed = 5,
}

impl ReconcilePhase {
    /// Returns true if the run cannot progress further.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Failed)
    }
}

/// Derived status summarizing the last reconciliation of a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleStatus {
    /// Terminal phase of the last run.
    pub phase: ReconcilePhase,
    /// Failure detail when `phase` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Module generation the run rendered.
    pub observed_generation: u64,
    /// Resources created by the run.
    pub created: u32,
    /// Resources updated in place by the run.
    pub updated: u32,
    /// Resources deleted by the run.
    pub deleted: u32,
    /// When the run finished.
    pub reconciled_at: DateTime<Utc>,
}
