//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Module records (spec, token, generation), keyed by module name.
    pub const MODULES: &str = "modules";

    /// Last reconciliation status per module, keyed by module name.
    ///
    /// Kept apart from `MODULES` so recording status never rotates the
    /// module's version token.
    pub const MODULE_STATUS: &str = "module_status";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::MODULES, cf::MODULE_STATUS]
}
