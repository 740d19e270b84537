//! Error types for the storage layer.

use modsync_core::{ModuleName, VersionToken};
use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found")]
    NotFound,

    /// A module with the same name already exists.
    #[error("module already exists: {0}")]
    AlreadyExists(ModuleName),

    /// The presented version token does not match the stored one.
    #[error("version token mismatch for module {name}: expected {expected}, current is {current}")]
    Conflict {
        /// The module being written.
        name: ModuleName,
        /// The token presented by the writer.
        expected: VersionToken,
        /// The token currently stored.
        current: VersionToken,
    },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}
