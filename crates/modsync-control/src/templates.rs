//! Template definition storage.
//!
//! This module provides the `TemplateStore` trait and two implementations:
//! an in-memory store and an HTTP store that reads `template.json` documents
//! from a raw-file repository layout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use modsync_store::TemplateRef;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ControlError, Result};

/// A parameterized bundle of manifest templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDefinition {
    /// Template name.
    #[serde(default)]
    pub name: String,
    /// Template version.
    #[serde(default)]
    pub version: String,
    /// Ordered manifest templates.
    pub manifests: Vec<Value>,
    /// Default values, overridden by module values.
    #[serde(default)]
    pub defaults: Map<String, Value>,
    /// Optional values schema; only `required` is enforced.
    #[serde(default)]
    pub schema: Value,
}

impl TemplateDefinition {
    /// Create a template with the given manifests and no defaults.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>, manifests: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            manifests,
            defaults: Map::new(),
            schema: Value::Null,
        }
    }

    /// Names listed under the schema's `required` key.
    #[must_use]
    pub fn required_values(&self) -> Vec<&str> {
        self.schema
            .get("required")
            .and_then(Value::as_array)
            .map(|required| required.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Trait for fetching template definitions.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Fetch the template a reference points at.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Template` if the template cannot be found or
    /// decoded.
    async fn fetch(&self, template_ref: &TemplateRef) -> Result<TemplateDefinition>;
}

/// Configuration for template fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Version used when a reference leaves it empty.
    pub default_version: String,
    /// Timeout for a single template fetch (seconds).
    pub fetch_timeout_seconds: u64,
    /// How long a fetched template is served from cache (seconds); 0 disables
    /// caching. Branch references such as `main` move, so this bounds how
    /// stale a render can be.
    pub cache_ttl_seconds: u64,
    /// Maximum number of cached templates.
    pub cache_capacity: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            default_version: "main".to_string(),
            fetch_timeout_seconds: 10,
            cache_ttl_seconds: 300,
            cache_capacity: 256,
        }
    }
}

impl TemplateConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `TEMPLATE_DEFAULT_VERSION`: version used for unversioned references
    /// - `TEMPLATE_FETCH_TIMEOUT_SECONDS`: per-fetch timeout
    /// - `TEMPLATE_CACHE_TTL_SECONDS`: cache lifetime of a fetched template
    /// - `TEMPLATE_CACHE_CAPACITY`: maximum cached templates
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TEMPLATE_DEFAULT_VERSION") {
            if !val.is_empty() {
                config.default_version = val;
            }
        }
        if let Ok(val) = std::env::var("TEMPLATE_FETCH_TIMEOUT_SECONDS") {
            if let Ok(n) = val.parse() {
                config.fetch_timeout_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("TEMPLATE_CACHE_TTL_SECONDS") {
            if let Ok(n) = val.parse() {
                config.cache_ttl_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("TEMPLATE_CACHE_CAPACITY") {
            if let Ok(n) = val.parse() {
                config.cache_capacity = n;
            }
        }

        config
    }

    /// Cache lifetime as a `Duration`.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Fill in the default version if the reference has none.
    #[must_use]
    pub fn resolve(&self, template_ref: &TemplateRef) -> TemplateRef {
        let mut resolved = template_ref.clone();
        if resolved.version.is_empty() {
            resolved.version.clone_from(&self.default_version);
        }
        resolved
    }
}

/// An in-memory template store.
#[derive(Debug, Default)]
pub struct StaticTemplateStore {
    templates: RwLock<HashMap<TemplateRef, TemplateDefinition>>,
}

impl StaticTemplateStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template, replacing any previous one under the same reference.
    pub fn insert(&self, template_ref: TemplateRef, template: TemplateDefinition) {
        self.templates.write().insert(template_ref, template);
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_template(self, template_ref: TemplateRef, template: TemplateDefinition) -> Self {
        self.insert(template_ref, template);
        self
    }
}

#[async_trait]
impl TemplateStore for StaticTemplateStore {
    async fn fetch(&self, template_ref: &TemplateRef) -> Result<TemplateDefinition> {
        self.templates
            .read()
            .get(template_ref)
            .cloned()
            .ok_or_else(|| ControlError::Template(format!("template not found: {template_ref}")))
    }
}

struct CachedTemplate {
    template: TemplateDefinition,
    fetched_at: Instant,
}

/// Fetches templates over HTTP from `{repo}/{version}/{path}/template.json`.
///
/// Successful fetches are cached per resolved reference for the configured
/// TTL. When the cache is full, expired entries go first, then the oldest.
pub struct HttpTemplateStore {
    client: reqwest::Client,
    config: TemplateConfig,
    cache: RwLock<HashMap<TemplateRef, CachedTemplate>>,
}

impl HttpTemplateStore {
    /// Create a new HTTP template store.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Internal` if the HTTP client cannot be built.
    pub fn new(config: TemplateConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ControlError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, config))
    }

    /// Create a store with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: TemplateConfig) -> Self {
        Self {
            client,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The URL a (resolved) reference is fetched from.
    #[must_use]
    pub fn url_for(template_ref: &TemplateRef) -> String {
        let repo = template_ref.repo.trim_end_matches('/');
        let path = template_ref.path.trim_matches('/');
        if path.is_empty() {
            format!("{repo}/{}/template.json", template_ref.version)
        } else {
            format!("{repo}/{}/{path}/template.json", template_ref.version)
        }
    }

    /// Drop every cached template.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    /// Get the number of cached templates.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    fn cached(&self, template_ref: &TemplateRef) -> Option<TemplateDefinition> {
        let ttl = self.config.cache_ttl();
        self.cache
            .read()
            .get(template_ref)
            .filter(|entry| entry.fetched_at.elapsed() < ttl)
            .map(|entry| entry.template.clone())
    }

    fn remember(&self, template_ref: TemplateRef, template: TemplateDefinition) {
        if self.config.cache_ttl_seconds == 0 || self.config.cache_capacity == 0 {
            return;
        }

        let ttl = self.config.cache_ttl();
        let mut cache = self.cache.write();
        if cache.len() >= self.config.cache_capacity && !cache.contains_key(&template_ref) {
            cache.retain(|_, entry| entry.fetched_at.elapsed() < ttl);
        }
        while cache.len() >= self.config.cache_capacity && !cache.contains_key(&template_ref) {
            let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, entry)| entry.fetched_at)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            cache.remove(&oldest);
        }

        cache.insert(
            template_ref,
            CachedTemplate {
                template,
                fetched_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl TemplateStore for HttpTemplateStore {
    async fn fetch(&self, template_ref: &TemplateRef) -> Result<TemplateDefinition> {
        let resolved = self.config.resolve(template_ref);
        if let Some(template) = self.cached(&resolved) {
            return Ok(template);
        }

        let url = Self::url_for(&resolved);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ControlError::Template(format!("fetching {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = %status, "Template fetch returned non-success status");
            return Err(ControlError::Template(format!(
                "fetching {url} returned {status}"
            )));
        }

        let mut template: TemplateDefinition = response
            .json()
            .await
            .map_err(|e| ControlError::Template(format!("decoding {url} failed: {e}")))?;

        if template.name.is_empty() {
            template.name = resolved
                .path
                .rsplit('/')
                .find(|s| !s.is_empty())
                .unwrap_or_default()
                .to_string();
        }
        if template.version.is_empty() {
            template.version.clone_from(&resolved.version);
        }

        tracing::debug!(url = %url, manifests = template.manifests.len(), "Fetched template");
        self.remember(resolved, template.clone());
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn template_body() -> Value {
        json!({
            "manifests": [
                { "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "{{ .Module.name }}" } }
            ],
            "defaults": { "replicas": 1 },
            "schema": { "required": ["image"] }
        })
    }

    #[test]
    fn url_layout() {
        let r = TemplateRef::new("https://raw.example.com/org/templates/", "/charts/web/", "v2");
        assert_eq!(
            HttpTemplateStore::url_for(&r),
            "https://raw.example.com/org/templates/v2/charts/web/template.json"
        );

        let root = TemplateRef::new("https://raw.example.com/t", "", "v1");
        assert_eq!(
            HttpTemplateStore::url_for(&root),
            "https://raw.example.com/t/v1/template.json"
        );
    }

    #[test]
    fn empty_version_uses_default() {
        let config = TemplateConfig::default();
        let resolved = config.resolve(&TemplateRef::new("https://r", "web", ""));
        assert_eq!(resolved.version, "main");

        let pinned = config.resolve(&TemplateRef::new("https://r", "web", "v3"));
        assert_eq!(pinned.version, "v3");
    }

    #[test]
    fn required_values_from_schema() {
        let template: TemplateDefinition = serde_json::from_value(template_body()).unwrap();
        assert_eq!(template.required_values(), vec!["image"]);
        assert!(TemplateDefinition::new("t", "v1", vec![]).required_values().is_empty());
    }

    #[tokio::test]
    async fn static_store_lookup() {
        let r = TemplateRef::new("https://r", "web", "v1");
        let store = StaticTemplateStore::new()
            .with_template(r.clone(), TemplateDefinition::new("web", "v1", vec![]));

        assert_eq!(store.fetch(&r).await.unwrap().name, "web");

        let missing = TemplateRef::new("https://r", "db", "v1");
        assert!(matches!(
            store.fetch(&missing).await,
            Err(ControlError::Template(_))
        ));
    }

    #[tokio::test]
    async fn http_store_fetches_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/main/charts/web/template.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(template_body()))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpTemplateStore::new(TemplateConfig::default()).unwrap();
        let r = TemplateRef::new(server.uri(), "charts/web", "");

        let first = store.fetch(&r).await.unwrap();
        assert_eq!(first.name, "web");
        assert_eq!(first.version, "main");
        assert_eq!(first.manifests.len(), 1);
        assert_eq!(first.defaults["replicas"], json!(1));

        // Served from cache; the mock expects exactly one request
        let second = store.fetch(&r).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.cached_count(), 1);

        store.clear_cache();
        assert_eq!(store.cached_count(), 0);
    }

    #[tokio::test]
    async fn http_store_refetches_when_caching_disabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/main/web/template.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(template_body()))
            .expect(2)
            .mount(&server)
            .await;

        let config = TemplateConfig {
            cache_ttl_seconds: 0,
            ..TemplateConfig::default()
        };
        let store = HttpTemplateStore::new(config).unwrap();
        let r = TemplateRef::new(server.uri(), "web", "");

        store.fetch(&r).await.unwrap();
        store.fetch(&r).await.unwrap();
        assert_eq!(store.cached_count(), 0);
    }

    #[tokio::test]
    async fn http_store_cache_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/web/template.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(template_body()))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/api/template.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(template_body()))
            .expect(1)
            .mount(&server)
            .await;

        let config = TemplateConfig {
            cache_capacity: 1,
            ..TemplateConfig::default()
        };
        let store = HttpTemplateStore::new(config).unwrap();
        let web = TemplateRef::new(server.uri(), "web", "v1");
        let api = TemplateRef::new(server.uri(), "api", "v1");

        store.fetch(&web).await.unwrap();
        store.fetch(&api).await.unwrap();
        assert_eq!(store.cached_count(), 1);

        // `web` was evicted by `api`
        store.fetch(&web).await.unwrap();
        assert_eq!(store.cached_count(), 1);
    }

    #[tokio::test]
    async fn http_store_reports_missing_template() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = HttpTemplateStore::new(TemplateConfig::default()).unwrap();
        let r = TemplateRef::new(server.uri(), "missing", "v1");

        let err = store.fetch(&r).await.unwrap_err();
        assert!(matches!(err, ControlError::Template(msg) if msg.contains("404")));
        assert_eq!(store.cached_count(), 0);
    }

    #[tokio::test]
    async fn http_store_rejects_invalid_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let store = HttpTemplateStore::new(TemplateConfig::default()).unwrap();
        let r = TemplateRef::new(server.uri(), "web", "v1");

        assert!(matches!(
            store.fetch(&r).await,
            Err(ControlError::Template(_))
        ));
    }
}
