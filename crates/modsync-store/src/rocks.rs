//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use modsync_core::{ModuleName, VersionToken};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::schema::{all_column_families, cf};
use crate::types::{Module, ModuleSpec, ModuleStatus, NewModule};
use crate::Store;

/// RocksDB-backed storage implementation.
///
/// Every write that depends on a prior read (insert, compare-and-swap,
/// delete, status) runs under a single write lock, so the token check and the
/// write happen atomically with respect to other writers in this process.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read a module record without its status.
    fn read_module(&self, name: &ModuleName) -> Result<Option<Module>> {
        let cf = self.cf(cf::MODULES)?;

        self.db
            .get_cf(&cf, name.as_str().as_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn read_status(&self, name: &ModuleName) -> Result<Option<ModuleStatus>> {
        let cf = self.cf(cf::MODULE_STATUS)?;

        self.db
            .get_cf(&cf, name.as_str().as_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Write a module record. Status is never persisted in this column family.
    fn write_module(&self, module: &Module) -> Result<()> {
        let cf = self.cf(cf::MODULES)?;
        let record = Module {
            status: None,
            ..module.clone()
        };
        let value = Self::serialize(&record)?;

        self.db
            .put_cf(&cf, module.name.as_str().as_bytes(), value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Store for RocksStore {
    fn insert_module(&self, module: NewModule) -> Result<Module> {
        let _guard = self.write_lock.lock();

        if self.read_module(&module.name)?.is_some() {
            return Err(StoreError::AlreadyExists(module.name));
        }

        let now = Utc::now();
        let record = Module {
            name: module.name,
            namespace: module.namespace,
            spec: module.spec,
            version_token: VersionToken::generate(),
            generation: 1,
            created_at: now,
            updated_at: now,
            status: None,
        };
        self.write_module(&record)?;

        tracing::debug!(module = %record.name, token = %record.version_token, "Inserted module");

        Ok(record)
    }

    fn get_module(&self, name: &ModuleName) -> Result<Option<Module>> {
        let Some(mut module) = self.read_module(name)? else {
            return Ok(None);
        };
        module.status = self.read_status(name)?;
        Ok(Some(module))
    }

    fn list_modules(&self) -> Result<Vec<Module>> {
        let cf = self.cf(cf::MODULES)?;

        let mut modules = Vec::new();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        for item in iter {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let mut module: Module = Self::deserialize(&value)?;
            module.status = self.read_status(&module.name)?;
            modules.push(module);
        }

        Ok(modules)
    }

    fn compare_and_swap(
        &self,
        name: &ModuleName,
        spec: ModuleSpec,
        expected: &VersionToken,
    ) -> Result<Module> {
        let _guard = self.write_lock.lock();

        let mut module = self.read_module(name)?.ok_or(StoreError::NotFound)?;

        if module.version_token != *expected {
            return Err(StoreError::Conflict {
                name: name.clone(),
                expected: expected.clone(),
                current: module.version_token,
            });
        }

        module.spec = spec;
        module.version_token = VersionToken::generate();
        module.generation += 1;
        module.updated_at = Utc::now();
        self.write_module(&module)?;

        tracing::debug!(
            module = %name,
            generation = module.generation,
            token = %module.version_token,
            "Swapped module spec"
        );

        module.status = self.read_status(name)?;
        Ok(module)
    }

    fn delete_module(&self, name: &ModuleName) -> Result<()> {
        let _guard = self.write_lock.lock();

        let cf_modules = self.cf(cf::MODULES)?;
        let cf_status = self.cf(cf::MODULE_STATUS)?;

        if self.read_module(name)?.is_none() {
            return Err(StoreError::NotFound);
        }

        let key = name.as_str().as_bytes();
        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_modules, key);
        batch.delete_cf(&cf_status, key);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn put_status(&self, name: &ModuleName, status: &ModuleStatus) -> Result<()> {
        let _guard = self.write_lock.lock();

        if self.read_module(name)?.is_none() {
            return Err(StoreError::NotFound);
        }

        let cf = self.cf(cf::MODULE_STATUS)?;
        let value = Self::serialize(status)?;

        self.db
            .put_cf(&cf, name.as_str().as_bytes(), value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ReconcilePhase, TemplateRef};
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn test_spec(replicas: u64) -> ModuleSpec {
        let values = json!({ "replicas": replicas, "image": { "tag": "1.0" } });
        ModuleSpec {
            template_ref: TemplateRef::new("https://templates.example.com", "web", "v1"),
            values: values.as_object().unwrap().clone(),
        }
    }

    fn new_module(name: &str) -> NewModule {
        NewModule {
            name: ModuleName::new(name).unwrap(),
            namespace: "default".to_string(),
            spec: test_spec(1),
        }
    }

    fn settled_status(generation: u64) -> ModuleStatus {
        ModuleStatus {
            phase: ReconcilePhase::Settled,
            message: None,
            observed_generation: generation,
            created: 2,
            updated: 0,
            deleted: 0,
            reconciled_at: Utc::now(),
        }
    }

    #[test]
    fn module_crud() {
        let (store, _dir) = create_test_store();

        // Create
        let module = store.insert_module(new_module("app")).unwrap();
        assert_eq!(module.generation, 1);
        assert!(module.status.is_none());

        // Read
        let retrieved = store.get_module(&module.name).unwrap().unwrap();
        assert_eq!(retrieved, module);
        assert_eq!(retrieved.spec.values["image"]["tag"], json!("1.0"));

        // Update
        let updated = store
            .compare_and_swap(&module.name, test_spec(3), &module.version_token)
            .unwrap();
        assert_eq!(updated.generation, 2);
        assert_ne!(updated.version_token, module.version_token);
        assert_eq!(updated.created_at, module.created_at);
        assert_eq!(updated.spec.values["replicas"], json!(3));

        // Delete
        store.delete_module(&module.name).unwrap();
        assert!(store.get_module(&module.name).unwrap().is_none());
        assert!(matches!(
            store.delete_module(&module.name),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn insert_duplicate_rejected() {
        let (store, _dir) = create_test_store();

        store.insert_module(new_module("app")).unwrap();
        let result = store.insert_module(new_module("app"));

        assert!(matches!(result, Err(StoreError::AlreadyExists(name)) if name.as_str() == "app"));
    }

    #[test]
    fn stale_token_rejected_and_spec_unchanged() {
        let (store, _dir) = create_test_store();
        let module = store.insert_module(new_module("app")).unwrap();
        let stale = module.version_token.clone();

        // A first writer succeeds and rotates the token
        let current = store
            .compare_and_swap(&module.name, test_spec(2), &stale)
            .unwrap();

        // A second writer still holding the old token is rejected
        let result = store.compare_and_swap(&module.name, test_spec(9), &stale);
        match result {
            Err(StoreError::Conflict {
                expected,
                current: stored,
                ..
            }) => {
                assert_eq!(expected, stale);
                assert_eq!(stored, current.version_token);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }

        let stored = store.get_module(&module.name).unwrap().unwrap();
        assert_eq!(stored.spec.values["replicas"], json!(2));
        assert_eq!(stored.version_token, current.version_token);
        assert_eq!(stored.generation, 2);
    }

    #[test]
    fn compare_and_swap_missing_module() {
        let (store, _dir) = create_test_store();
        let name = ModuleName::new("ghost").unwrap();

        let result = store.compare_and_swap(&name, test_spec(1), &VersionToken::generate());
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[test]
    fn list_modules_ordered_by_name() {
        let (store, _dir) = create_test_store();

        for name in ["web", "api", "db"] {
            store.insert_module(new_module(name)).unwrap();
        }

        let names: Vec<String> = store
            .list_modules()
            .unwrap()
            .into_iter()
            .map(|m| m.name.to_string())
            .collect();
        assert_eq!(names, vec!["api", "db", "web"]);
    }

    #[test]
    fn status_does_not_rotate_token() {
        let (store, _dir) = create_test_store();
        let module = store.insert_module(new_module("app")).unwrap();

        store
            .put_status(&module.name, &settled_status(module.generation))
            .unwrap();

        let stored = store.get_module(&module.name).unwrap().unwrap();
        assert_eq!(stored.version_token, module.version_token);
        let status = stored.status.unwrap();
        assert_eq!(status.phase, ReconcilePhase::Settled);
        assert_eq!(status.created, 2);

        // The original token still updates the spec
        let updated = store
            .compare_and_swap(&module.name, test_spec(5), &module.version_token)
            .unwrap();
        assert!(updated.status.is_some());
    }

    #[test]
    fn status_for_missing_module_rejected() {
        let (store, _dir) = create_test_store();
        let name = ModuleName::new("ghost").unwrap();

        assert!(matches!(
            store.put_status(&name, &settled_status(1)),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn delete_removes_status() {
        let (store, _dir) = create_test_store();
        let module = store.insert_module(new_module("app")).unwrap();
        store
            .put_status(&module.name, &settled_status(1))
            .unwrap();

        store.delete_module(&module.name).unwrap();
        let recreated = store.insert_module(new_module("app")).unwrap();

        assert!(store
            .get_module(&recreated.name)
            .unwrap()
            .unwrap()
            .status
            .is_none());
    }
}
