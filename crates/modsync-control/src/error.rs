//! Error types for the reconciliation core.
//!
//! This module defines all errors that can occur while managing modules and
//! reconciling their resources.

use modsync_cluster::ClusterError;
use modsync_core::{ModuleName, ResourceIdentity, VersionToken};
use modsync_store::StoreError;
use thiserror::Error;

use crate::types::ApplyProgress;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in module operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A request failed validation before any collaborator was called.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested module was not found.
    #[error("module not found: {0}")]
    ModuleNotFound(ModuleName),

    /// A module with the same name already exists.
    #[error("module already exists: {0}")]
    AlreadyExists(ModuleName),

    /// The presented version token is stale.
    #[error("module {name} was modified concurrently: expected version {expected}, current is {current}")]
    Conflict {
        /// The module being updated.
        name: ModuleName,
        /// The token the caller presented.
        expected: VersionToken,
        /// The token currently stored.
        current: VersionToken,
    },

    /// A rendered manifest has no usable identity.
    #[error("malformed resource: {0}")]
    MalformedResource(String),

    /// Querying the cluster for owned resources failed.
    #[error("resource lookup failed: {0}")]
    Lookup(#[source] ClusterError),

    /// The template could not be fetched or rendered.
    #[error("template error: {0}")]
    Template(String),

    /// The resource exists but is not owned by the module.
    #[error("resource {identity} is not owned by module {module}")]
    NotOwned {
        /// The module that attempted the operation.
        module: ModuleName,
        /// The resource that was refused.
        identity: ResourceIdentity,
    },

    /// The addressed cluster resource does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceIdentity),

    /// Applying stopped partway; `progress` records what was done.
    #[error("apply stopped after {} write(s): {source}", .progress.completed())]
    PartialApply {
        /// Writes completed before the failure.
        progress: ApplyProgress,
        /// The failure that stopped the apply.
        #[source]
        source: Box<ControlError>,
    },

    /// The apply was cancelled; `0` records what was done.
    #[error("apply cancelled after {} write(s)", .0.completed())]
    Cancelled(ApplyProgress),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[source] StoreError),

    /// A cluster write failed.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ControlError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(name) => Self::AlreadyExists(name),
            StoreError::Conflict {
                name,
                expected,
                current,
            } => Self::Conflict {
                name,
                expected,
                current,
            },
            other => Self::Store(other),
        }
    }
}

impl ControlError {
    /// A stable, machine-readable name for the error category.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ModuleNotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::Conflict { .. } => "conflict",
            Self::MalformedResource(_) => "malformed_resource",
            Self::Lookup(_) => "lookup",
            Self::Template(_) => "template",
            Self::NotOwned { .. } => "not_owned",
            Self::ResourceNotFound(_) => "resource_not_found",
            Self::PartialApply { .. } => "partial_apply",
            Self::Cancelled(_) => "cancelled",
            Self::Store(_) => "store",
            Self::Cluster(_) => "cluster",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::ModuleNotFound(_) | Self::ResourceNotFound(_) => 404,
            Self::AlreadyExists(_) | Self::Conflict { .. } => 409,
            Self::NotOwned { .. } => 403,
            Self::MalformedResource(_) | Self::Template(_) => 422,
            Self::Lookup(_) | Self::Cancelled(_) => 503,
            Self::Cluster(e) => e.http_status_code(),
            Self::PartialApply { source, .. } => source.http_status_code(),
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Lookup(_) | Self::Store(_) | Self::Cancelled(_) => true,
            Self::Cluster(e) => e.is_retriable(),
            Self::PartialApply { source, .. } => source.is_retriable(),
            _ => false,
        }
    }
}
