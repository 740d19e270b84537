//! `RocksDB` storage layer for modsync.
//!
//! This crate persists module records and their last reconciliation status.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `modules`: Module records (spec, version token, generation), keyed by name
//! - `module_status`: Last reconciliation outcome, keyed by name
//!
//! Spec writes go through [`Store::compare_and_swap`], which checks the
//! presented version token and rotates it atomically. Status writes never
//! rotate the token.
//!
//! # Example
//!
//! ```no_run
//! use modsync_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/modsync-db").unwrap();
//!
//! for module in store.list_modules().unwrap() {
//!     println!("{} @ {}", module.name, module.version_token);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{Module, ModuleSpec, ModuleStatus, NewModule, ReconcilePhase, TemplateRef};

use modsync_core::{ModuleName, VersionToken};

/// The storage trait defining all module record operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    /// Insert a new module with a fresh version token and generation 1.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if a module with the same name exists.
    fn insert_module(&self, module: NewModule) -> Result<Module>;

    /// Get a module by name, with its status attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_module(&self, name: &ModuleName) -> Result<Option<Module>>;

    /// List all modules ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_modules(&self) -> Result<Vec<Module>>;

    /// Replace a module's spec if `expected` matches the stored version token.
    ///
    /// On success the token is replaced and the generation incremented.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the module doesn't exist, or
    /// `StoreError::Conflict` if the token is stale.
    fn compare_and_swap(
        &self,
        name: &ModuleName,
        spec: ModuleSpec,
        expected: &VersionToken,
    ) -> Result<Module>;

    /// Delete a module and its status.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the module doesn't exist.
    fn delete_module(&self, name: &ModuleName) -> Result<()>;

    /// Record the outcome of a reconciliation run.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the module doesn't exist.
    fn put_status(&self, name: &ModuleName, status: &ModuleStatus) -> Result<()>;
}
