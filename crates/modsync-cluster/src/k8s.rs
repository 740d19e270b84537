//! Kubernetes cluster store implementation.
//!
//! This module provides the `K8sClusterStore`, which reads and writes arbitrary
//! resource kinds through the dynamic API, resolving kinds via discovery.

use async_trait::async_trait;
use futures::future::try_join_all;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::Client;
use modsync_core::ResourceIdentity;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{KindCache, KindEntry};
use crate::types::{identity_of, ClusterConfig, ClusterResource, KindScope};
use crate::{ClusterError, Result};

/// The `ClusterStore` trait defines the cluster operations the reconciler needs.
///
/// Every operation is addressed by resource identity; writes carry no
/// resource-version precondition.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch a resource by identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails. A missing resource is `Ok(None)`.
    async fn get(&self, id: &ResourceIdentity) -> Result<Option<ClusterResource>>;

    /// List every resource, of any kind, carrying `key=value` as a label.
    ///
    /// # Errors
    ///
    /// Returns an error if any kind cannot be listed; partial results are
    /// never returned.
    async fn list_by_label(&self, key: &str, value: &str) -> Result<Vec<ClusterResource>>;

    /// Create a resource from a manifest.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::AlreadyExists` if the identity is taken.
    async fn create(&self, manifest: &Value) -> Result<ClusterResource>;

    /// Replace an existing resource with a manifest, unconditionally.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::NotFound` if the resource doesn't exist.
    async fn replace(&self, manifest: &Value) -> Result<ClusterResource>;

    /// Delete a resource by identity.
    ///
    /// Returns `false` if the resource was already gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails for any other reason.
    async fn delete(&self, id: &ResourceIdentity) -> Result<bool>;

    /// How the cluster scopes objects of `kind` at `api_version`.
    ///
    /// Returns `Ok(None)` if the cluster does not serve the kind.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails.
    async fn kind_scope(&self, api_version: &str, kind: &str) -> Result<Option<KindScope>>;
}

/// Kubernetes-backed cluster store using the dynamic API.
pub struct K8sClusterStore {
    client: Client,
    config: ClusterConfig,
    kinds: KindCache,
}

impl K8sClusterStore {
    /// Create a new cluster store.
    ///
    /// This will attempt to connect to the cluster using in-cluster config
    /// or kubeconfig file.
    ///
    /// # Errors
    ///
    /// Returns an error if the Kubernetes client cannot be created.
    pub async fn new(config: ClusterConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::with_client(client, config))
    }

    /// Create a new cluster store with a pre-configured client.
    #[must_use]
    pub fn with_client(client: Client, config: ClusterConfig) -> Self {
        Self {
            client,
            config,
            kinds: KindCache::new(),
        }
    }

    /// Get a reference to the cluster config.
    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Run discovery and reload the kind cache.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::Discovery` if the API server cannot be queried.
    pub async fn refresh_kinds(&self) -> Result<()> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| ClusterError::Discovery(e.to_string()))?;

        self.kinds
            .refresh(&discovery, |group| self.config.skips_group(group));
        Ok(())
    }

    async fn ensure_kinds(&self) -> Result<()> {
        if !self.kinds.is_populated() {
            self.refresh_kinds().await?;
        }
        Ok(())
    }

    /// Resolve a kind, refreshing discovery once on a miss.
    async fn resolve(&self, id: &ResourceIdentity) -> Result<KindEntry> {
        let gvk = GroupVersionKind::gvk(&id.group, &id.version, &id.kind);

        self.ensure_kinds().await?;
        if let Some(entry) = self.kinds.get(&gvk) {
            return Ok(entry);
        }

        debug!(kind = %id.kind, api_version = %id.api_version(), "Kind cache miss, rediscovering");
        self.refresh_kinds().await?;
        self.kinds
            .get(&gvk)
            .ok_or_else(|| ClusterError::UnknownKind(format!("{}/{}", id.api_version(), id.kind)))
    }

    /// Build a dynamic API handle scoped for the identity.
    fn api_for(&self, entry: &KindEntry, id: &ResourceIdentity) -> Result<Api<DynamicObject>> {
        let (ar, caps) = entry;
        match caps.scope {
            Scope::Cluster => Ok(Api::all_with(self.client.clone(), ar)),
            Scope::Namespaced if id.namespace.is_empty() => Err(ClusterError::InvalidManifest(
                format!("{} is namespaced but has no namespace", id.kind),
            )),
            Scope::Namespaced => Ok(Api::namespaced_with(
                self.client.clone(),
                &id.namespace,
                ar,
            )),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.config.field_manager.clone()),
            ..PostParams::default()
        }
    }

    /// Convert a live object into a `ClusterResource`.
    ///
    /// List responses omit `apiVersion` and `kind` on items, so they are
    /// filled in from the resolved kind.
    fn to_resource(ar: &ApiResource, mut obj: DynamicObject) -> Result<ClusterResource> {
        obj.metadata.managed_fields = None;

        let mut manifest = serde_json::to_value(&obj)?;
        if let Some(map) = manifest.as_object_mut() {
            map.insert("apiVersion".to_string(), Value::String(ar.api_version.clone()));
            map.insert("kind".to_string(), Value::String(ar.kind.clone()));
        }
        ClusterResource::from_manifest(manifest)
    }

    fn decode(manifest: &Value) -> Result<(ResourceIdentity, DynamicObject)> {
        let id = identity_of(manifest)?;
        let mut obj: DynamicObject = serde_json::from_value(manifest.clone())
            .map_err(|e| ClusterError::InvalidManifest(e.to_string()))?;
        obj.metadata.resource_version = None;
        Ok((id, obj))
    }

    async fn list_kind(
        &self,
        entry: KindEntry,
        selector: &str,
    ) -> Result<Vec<ClusterResource>> {
        let (ar, _) = &entry;
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), ar);
        let list = api.list(&ListParams::default().labels(selector)).await?;

        list.items
            .into_iter()
            .map(|obj| Self::to_resource(ar, obj))
            .collect()
    }
}

#[async_trait]
impl ClusterStore for K8sClusterStore {
    async fn get(&self, id: &ResourceIdentity) -> Result<Option<ClusterResource>> {
        let entry = self.resolve(id).await?;
        let api = self.api_for(&entry, id)?;

        match api.get_opt(&id.name).await? {
            Some(obj) => Ok(Some(Self::to_resource(&entry.0, obj)?)),
            None => Ok(None),
        }
    }

    async fn list_by_label(&self, key: &str, value: &str) -> Result<Vec<ClusterResource>> {
        self.ensure_kinds().await?;
        let selector = format!("{key}={value}");

        let lists = try_join_all(
            self.kinds
                .listable()
                .into_iter()
                .map(|entry| self.list_kind(entry, &selector)),
        )
        .await?;

        let mut resources: Vec<ClusterResource> = lists.into_iter().flatten().collect();
        resources.sort_by(|a, b| a.identity.cmp(&b.identity));
        resources.dedup_by(|a, b| a.identity == b.identity);

        debug!(selector, count = resources.len(), "Listed labelled resources");
        Ok(resources)
    }

    async fn create(&self, manifest: &Value) -> Result<ClusterResource> {
        let (id, obj) = Self::decode(manifest)?;
        let entry = self.resolve(&id).await?;
        let api = self.api_for(&entry, &id)?;

        match api.create(&self.post_params(), &obj).await {
            Ok(created) => {
                info!(identity = %id, "Created resource");
                Self::to_resource(&entry.0, created)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Err(ClusterError::AlreadyExists(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, manifest: &Value) -> Result<ClusterResource> {
        let (id, obj) = Self::decode(manifest)?;
        let entry = self.resolve(&id).await?;
        let api = self.api_for(&entry, &id)?;

        match api.replace(&id.name, &self.post_params(), &obj).await {
            Ok(replaced) => {
                info!(identity = %id, "Replaced resource");
                Self::to_resource(&entry.0, replaced)
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Err(ClusterError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &ResourceIdentity) -> Result<bool> {
        let entry = self.resolve(id).await?;
        let api = self.api_for(&entry, id)?;

        match api.delete(&id.name, &DeleteParams::background()).await {
            Ok(_) => {
                info!(identity = %id, "Deleted resource");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!(identity = %id, "Resource not found, already deleted");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn kind_scope(&self, api_version: &str, kind: &str) -> Result<Option<KindScope>> {
        let id = ResourceIdentity::new(api_version, kind, "", "");
        match self.resolve(&id).await {
            Ok((_, caps)) => Ok(Some(match caps.scope {
                Scope::Cluster => KindScope::Cluster,
                Scope::Namespaced => KindScope::Namespaced,
            })),
            Err(ClusterError::UnknownKind(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// An in-memory cluster for testing without a real Kubernetes cluster.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use chrono::{SecondsFormat, Utc};
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::time::Duration;

    /// A write recorded by the mock, in call order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ClusterOp {
        /// A create call.
        Create(ResourceIdentity),
        /// A replace call.
        Replace(ResourceIdentity),
        /// A delete call.
        Delete(ResourceIdentity),
    }

    /// Which operation an injected failure applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum OpKind {
        /// `get`
        Get,
        /// `create`
        Create,
        /// `replace`
        Replace,
        /// `delete`
        Delete,
    }

    /// A mock cluster that stores objects in memory.
    #[derive(Default)]
    pub struct MockClusterStore {
        objects: Mutex<BTreeMap<ResourceIdentity, Value>>,
        ops: Mutex<Vec<ClusterOp>>,
        failures: Mutex<HashSet<(OpKind, ResourceIdentity)>>,
        fail_lists: Mutex<bool>,
        write_delay: Mutex<Option<Duration>>,
        next_version: Mutex<u64>,
        scopes: Mutex<HashMap<(String, String), KindScope>>,
    }

    impl MockClusterStore {
        /// Create a new empty mock cluster.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed an object directly, bypassing the operation log.
        ///
        /// # Panics
        ///
        /// Panics if the manifest has no identity.
        pub fn insert(&self, mut manifest: Value) {
            let id = identity_of(&manifest).expect("seeded manifest must have an identity");
            let id = self.place(id, &mut manifest);
            self.objects.lock().insert(id, manifest);
        }

        /// Serve `kind` at `api_version` with the given scope.
        ///
        /// Objects of a cluster-scoped kind are stored without a namespace
        /// and found regardless of the namespace they are addressed with, the
        /// way the API server treats them. Kinds never registered are
        /// unknown to `kind_scope` and stored as addressed.
        pub fn set_kind_scope(&self, api_version: &str, kind: &str, scope: KindScope) {
            self.scopes
                .lock()
                .insert((api_version.to_string(), kind.to_string()), scope);
        }

        /// Get the stored object for an identity.
        #[must_use]
        pub fn get_manifest(&self, id: &ResourceIdentity) -> Option<Value> {
            let key = self.key(id);
            self.objects.lock().get(&key).cloned()
        }

        /// Check whether an identity exists.
        #[must_use]
        pub fn contains(&self, id: &ResourceIdentity) -> bool {
            let key = self.key(id);
            self.objects.lock().contains_key(&key)
        }

        /// All stored identities, in order.
        #[must_use]
        pub fn identities(&self) -> Vec<ResourceIdentity> {
            self.objects.lock().keys().cloned().collect()
        }

        /// Get the number of stored objects.
        #[must_use]
        pub fn object_count(&self) -> usize {
            self.objects.lock().len()
        }

        /// Writes performed so far, in call order.
        #[must_use]
        pub fn operations(&self) -> Vec<ClusterOp> {
            self.ops.lock().clone()
        }

        /// Make every future `op` on `id` fail with `ClusterError::Unavailable`.
        pub fn fail_on(&self, op: OpKind, id: &ResourceIdentity) {
            self.failures.lock().insert((op, id.clone()));
        }

        /// Make every future `list_by_label` fail.
        pub fn fail_lists(&self, fail: bool) {
            *self.fail_lists.lock() = fail;
        }

        /// Sleep before completing each write.
        pub fn set_write_delay(&self, delay: Option<Duration>) {
            *self.write_delay.lock() = delay;
        }

        fn check_failure(&self, op: OpKind, id: &ResourceIdentity) -> Result<()> {
            if self.failures.lock().contains(&(op, id.clone())) {
                return Err(ClusterError::Unavailable(format!(
                    "injected {op:?} failure for {id}"
                )));
            }
            Ok(())
        }

        async fn delay(&self) {
            let delay = *self.write_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        fn scope_of(&self, id: &ResourceIdentity) -> Option<KindScope> {
            self.scopes
                .lock()
                .get(&(id.api_version(), id.kind.clone()))
                .copied()
        }

        /// The identity an object is stored under.
        fn key(&self, id: &ResourceIdentity) -> ResourceIdentity {
            let mut key = id.clone();
            if self.scope_of(id) == Some(KindScope::Cluster) {
                key.namespace.clear();
            }
            key
        }

        /// Resolve the storage key for a manifest, dropping its namespace if
        /// the kind is cluster-scoped.
        fn place(&self, id: ResourceIdentity, manifest: &mut Value) -> ResourceIdentity {
            let key = self.key(&id);
            if key.namespace.is_empty() {
                if let Some(meta) = manifest.get_mut("metadata").and_then(Value::as_object_mut) {
                    meta.remove("namespace");
                }
            }
            key
        }

        fn bump_version(&self) -> String {
            let mut next = self.next_version.lock();
            *next += 1;
            next.to_string()
        }

        fn set_metadata(manifest: &mut Value, key: &str, value: Value) {
            if let Some(meta) = manifest
                .as_object_mut()
                .map(|m| m.entry("metadata").or_insert_with(|| Value::Object(serde_json::Map::new())))
                .and_then(Value::as_object_mut)
            {
                meta.insert(key.to_string(), value);
            }
        }
    }

    #[async_trait]
    impl ClusterStore for MockClusterStore {
        async fn get(&self, id: &ResourceIdentity) -> Result<Option<ClusterResource>> {
            self.check_failure(OpKind::Get, id)?;
            let key = self.key(id);
            let found = self.objects.lock().get(&key).cloned();
            Ok(found.map(|manifest| ClusterResource {
                identity: key,
                manifest,
            }))
        }

        async fn list_by_label(&self, key: &str, value: &str) -> Result<Vec<ClusterResource>> {
            if *self.fail_lists.lock() {
                return Err(ClusterError::Unavailable("injected list failure".to_string()));
            }

            Ok(self
                .objects
                .lock()
                .iter()
                .map(|(id, manifest)| ClusterResource {
                    identity: id.clone(),
                    manifest: manifest.clone(),
                })
                .filter(|resource| resource.label(key) == Some(value))
                .collect())
        }

        async fn create(&self, manifest: &Value) -> Result<ClusterResource> {
            let id = identity_of(manifest)?;
            self.ops.lock().push(ClusterOp::Create(id.clone()));
            self.delay().await;
            self.check_failure(OpKind::Create, &id)?;

            let mut stored = manifest.clone();
            let id = self.place(id, &mut stored);
            if self.contains(&id) {
                return Err(ClusterError::AlreadyExists(id));
            }
            Self::set_metadata(&mut stored, "uid", Value::String(uuid::Uuid::new_v4().to_string()));
            Self::set_metadata(
                &mut stored,
                "creationTimestamp",
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
            Self::set_metadata(&mut stored, "resourceVersion", Value::String(self.bump_version()));

            self.objects.lock().insert(id.clone(), stored.clone());
            Ok(ClusterResource {
                identity: id,
                manifest: stored,
            })
        }

        async fn replace(&self, manifest: &Value) -> Result<ClusterResource> {
            let id = identity_of(manifest)?;
            self.ops.lock().push(ClusterOp::Replace(id.clone()));
            self.delay().await;
            self.check_failure(OpKind::Replace, &id)?;

            let mut stored = manifest.clone();
            let id = self.place(id, &mut stored);
            let Some(existing) = self.get_manifest(&id) else {
                return Err(ClusterError::NotFound(id));
            };

            for key in ["uid", "creationTimestamp"] {
                if let Some(value) = existing.pointer(&format!("/metadata/{key}")) {
                    Self::set_metadata(&mut stored, key, value.clone());
                }
            }
            Self::set_metadata(&mut stored, "resourceVersion", Value::String(self.bump_version()));

            self.objects.lock().insert(id.clone(), stored.clone());
            Ok(ClusterResource {
                identity: id,
                manifest: stored,
            })
        }

        async fn delete(&self, id: &ResourceIdentity) -> Result<bool> {
            self.ops.lock().push(ClusterOp::Delete(id.clone()));
            self.delay().await;
            self.check_failure(OpKind::Delete, id)?;

            let key = self.key(id);
            Ok(self.objects.lock().remove(&key).is_some())
        }

        async fn kind_scope(&self, api_version: &str, kind: &str) -> Result<Option<KindScope>> {
            Ok(self
                .scopes
                .lock()
                .get(&(api_version.to_string(), kind.to_string()))
                .copied())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{ClusterOp, MockClusterStore, OpKind};
    use super::*;
    use crate::types::labels;
    use serde_json::json;

    fn config_map(name: &str, owner: Option<&str>) -> Value {
        let mut manifest = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "default" },
            "data": { "key": "value" }
        });
        if let Some(owner) = owner {
            manifest["metadata"]["labels"] = json!({ "modsync.io/module": owner });
        }
        manifest
    }

    fn cm_id(name: &str) -> ResourceIdentity {
        ResourceIdentity::new("v1", "ConfigMap", "default", name)
    }

    #[tokio::test]
    async fn mock_create_get_delete() {
        let cluster = MockClusterStore::new();

        let created = cluster.create(&config_map("a", Some("web"))).await.unwrap();
        assert_eq!(created.identity, cm_id("a"));
        assert!(created.uid().is_some());

        let fetched = cluster.get(&cm_id("a")).await.unwrap().unwrap();
        assert_eq!(fetched.manifest, created.manifest);

        assert!(cluster.delete(&cm_id("a")).await.unwrap());
        assert!(!cluster.delete(&cm_id("a")).await.unwrap());
        assert!(cluster.get(&cm_id("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mock_create_existing_conflicts() {
        let cluster = MockClusterStore::new();
        cluster.insert(config_map("a", None));

        let err = cluster.create(&config_map("a", Some("web"))).await.unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyExists(id) if id == cm_id("a")));
    }

    #[tokio::test]
    async fn mock_replace_keeps_creation_metadata() {
        let cluster = MockClusterStore::new();
        let created = cluster.create(&config_map("a", Some("web"))).await.unwrap();

        let mut updated = config_map("a", Some("web"));
        updated["data"]["key"] = json!("changed");
        let replaced = cluster.replace(&updated).await.unwrap();

        assert_eq!(replaced.uid(), created.uid());
        assert_eq!(
            replaced.manifest["metadata"]["creationTimestamp"],
            created.manifest["metadata"]["creationTimestamp"]
        );
        assert_ne!(
            replaced.manifest["metadata"]["resourceVersion"],
            created.manifest["metadata"]["resourceVersion"]
        );
        assert_eq!(replaced.manifest["data"]["key"], json!("changed"));
    }

    #[tokio::test]
    async fn mock_replace_missing_fails() {
        let cluster = MockClusterStore::new();
        let err = cluster.replace(&config_map("a", None)).await.unwrap_err();
        assert!(matches!(err, ClusterError::NotFound(_)));
    }

    #[tokio::test]
    async fn mock_list_by_label_filters() {
        let cluster = MockClusterStore::new();
        cluster.insert(config_map("mine", Some("web")));
        cluster.insert(config_map("other", Some("api")));
        cluster.insert(config_map("plain", None));

        let owned = cluster.list_by_label(labels::MODULE, "web").await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].identity, cm_id("mine"));

        cluster.fail_lists(true);
        assert!(cluster.list_by_label(labels::MODULE, "web").await.is_err());
    }

    #[tokio::test]
    async fn mock_records_operations_and_failures() {
        let cluster = MockClusterStore::new();
        cluster.fail_on(OpKind::Delete, &cm_id("b"));

        cluster.create(&config_map("a", None)).await.unwrap();
        let err = cluster.delete(&cm_id("b")).await.unwrap_err();
        assert!(err.is_retriable());

        assert_eq!(
            cluster.operations(),
            vec![ClusterOp::Create(cm_id("a")), ClusterOp::Delete(cm_id("b"))]
        );
    }

    #[tokio::test]
    async fn mock_cluster_scoped_kinds_ignore_namespace() {
        let cluster = MockClusterStore::new();
        cluster.set_kind_scope("cert-manager.io/v1", "ClusterIssuer", KindScope::Cluster);

        let created = cluster
            .create(&json!({
                "apiVersion": "cert-manager.io/v1",
                "kind": "ClusterIssuer",
                "metadata": { "name": "letsencrypt", "namespace": "default" }
            }))
            .await
            .unwrap();

        let cluster_wide = ResourceIdentity::new("cert-manager.io/v1", "ClusterIssuer", "", "letsencrypt");
        assert_eq!(created.identity, cluster_wide);
        assert!(created.manifest["metadata"].get("namespace").is_none());

        let addressed = ResourceIdentity::new("cert-manager.io/v1", "ClusterIssuer", "default", "letsencrypt");
        let fetched = cluster.get(&addressed).await.unwrap().unwrap();
        assert_eq!(fetched.identity, cluster_wide);

        assert_eq!(
            cluster.kind_scope("cert-manager.io/v1", "ClusterIssuer").await.unwrap(),
            Some(KindScope::Cluster)
        );
        assert_eq!(cluster.kind_scope("v1", "ConfigMap").await.unwrap(), None);
    }
}
