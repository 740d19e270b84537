//! Error types for the cluster crate.

use modsync_core::ResourceIdentity;
use thiserror::Error;

/// Errors that can occur while talking to the cluster.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// API discovery failed.
    #[error("API discovery failed: {0}")]
    Discovery(String),

    /// The cluster does not serve the requested group/version/kind.
    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    /// The resource does not exist in the cluster.
    #[error("Resource not found: {0}")]
    NotFound(ResourceIdentity),

    /// A resource with the same identity already exists.
    #[error("Resource already exists: {0}")]
    AlreadyExists(ResourceIdentity),

    /// The manifest lacks required fields or cannot be decoded.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// JSON conversion error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cluster could not be reached.
    #[error("Cluster unavailable: {0}")]
    Unavailable(String),
}

impl ClusterError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::KubeApi(_) | Self::Discovery(_) | Self::Unavailable(_)
        )
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::AlreadyExists(_) => 409,
            Self::UnknownKind(_) | Self::InvalidManifest(_) => 400,
            Self::Serialization(_) => 500,
            Self::KubeApi(_) | Self::Discovery(_) | Self::Unavailable(_) => 503,
        }
    }
}

/// A specialized Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
