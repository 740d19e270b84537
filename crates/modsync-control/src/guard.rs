//! Optimistic-concurrency guard for module writes.
//!
//! The token check happens inside the store under its write lock, so a stale
//! token can never overwrite a newer spec. Conflicts are reported, never
//! merged.

use modsync_core::{ModuleName, VersionToken};
use modsync_store::{Module, ModuleSpec, Store, StoreError};

use crate::error::{ControlError, Result};

/// Replace a module's spec if `expected` is still the current token.
///
/// # Errors
///
/// Returns `ControlError::Conflict` if the token is stale (the stored module
/// is unchanged), or `ControlError::ModuleNotFound` if the module is gone.
pub fn update_module<S: Store + ?Sized>(
    store: &S,
    name: &ModuleName,
    spec: ModuleSpec,
    expected: &VersionToken,
) -> Result<Module> {
    match store.compare_and_swap(name, spec, expected) {
        Ok(module) => Ok(module),
        Err(StoreError::NotFound) => Err(ControlError::ModuleNotFound(name.clone())),
        Err(e) => {
            let err = ControlError::from(e);
            if matches!(err, ControlError::Conflict { .. }) {
                tracing::warn!(module = %name, expected = %expected, "Rejected stale module update");
            }
            Err(err)
        }
    }
}

/// Reject an update that tries to move a module to another namespace.
///
/// # Errors
///
/// Returns `ControlError::Validation` if `requested` differs from the
/// module's namespace.
pub fn ensure_namespace_unchanged(module: &Module, requested: Option<&str>) -> Result<()> {
    match requested {
        Some(ns) if ns != module.namespace => Err(ControlError::Validation(format!(
            "namespace is immutable: module {} is in {:?}, update requested {ns:?}",
            module.name, module.namespace
        ))),
        _ => Ok(()),
    }
}
