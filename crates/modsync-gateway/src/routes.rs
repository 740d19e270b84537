//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use modsync_control::ModuleControl;

use crate::handlers::{health, modules, resources};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// - `GET /health` - Health check
///
/// ## Modules
/// - `GET /v1/modules` - List modules
/// - `POST /v1/modules` - Create module
/// - `GET /v1/modules/:name` - Get module
/// - `PUT /v1/modules/:name` - Update module
/// - `DELETE /v1/modules/:name` - Delete module and its resources
///
/// ## Resources
/// - `GET /v1/modules/:name/resources` - List owned and missing resources
/// - `DELETE /v1/modules/:name/resources` - Delete one owned resource (identity body)
///
/// ## Rendering
/// - `GET /v1/modules/:name/template` - Render the stored spec
/// - `POST /v1/modules/:name/template` - Render a proposed spec alongside
/// - `GET /v1/modules/:name/plan` - Plan a reconcile
/// - `POST /v1/modules/:name/reconcile` - Reconcile now
/// - `POST /v1/modules/:name/validate` - Check the render
pub fn create_router<C>(state: GatewayState<C>) -> Router
where
    C: ModuleControl + 'static,
{
    // Extract config values before moving state
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let state = Arc::new(state);

    Router::new()
        .route("/health", get(health::health))
        // Modules
        .route(
            "/v1/modules",
            get(modules::list_modules::<C>).post(modules::create_module::<C>),
        )
        .route(
            "/v1/modules/:name",
            get(modules::get_module::<C>)
                .put(modules::update_module::<C>)
                .delete(modules::delete_module::<C>),
        )
        // Resources
        .route(
            "/v1/modules/:name/resources",
            get(resources::list_resources::<C>).delete(resources::delete_resource::<C>),
        )
        // Rendering and reconciliation
        .route(
            "/v1/modules/:name/template",
            get(modules::get_template::<C>).post(modules::preview_template::<C>),
        )
        .route("/v1/modules/:name/plan", get(modules::plan_module::<C>))
        .route(
            "/v1/modules/:name/reconcile",
            post(modules::reconcile_module::<C>),
        )
        .route(
            "/v1/modules/:name/validate",
            post(modules::validate_module::<C>),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum_test::TestServer;
    use modsync_cluster::MockClusterStore;
    use modsync_control::{
        ControlConfig, ModuleService, StaticTemplateStore, TemplateDefinition, TemplateRef,
    };
    use modsync_store::RocksStore;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::GatewayConfig;

    fn web_ref() -> TemplateRef {
        TemplateRef::new("https://templates.test", "web", "v1")
    }

    fn test_state(
        config: GatewayConfig,
    ) -> (GatewayState<ModuleService<RocksStore>>, Arc<MockClusterStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let cluster = Arc::new(MockClusterStore::new());
        let templates = StaticTemplateStore::new().with_template(
            web_ref(),
            TemplateDefinition::new(
                "web",
                "v1",
                vec![
                    json!({ "apiVersion": "apps/v1", "kind": "Deployment", "metadata": { "name": "{{ .Module.name }}" } }),
                    json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "{{ .Module.name }}" } }),
                ],
            ),
        );

        let control = ModuleService::new(
            store,
            cluster.clone(),
            Arc::new(templates),
            ControlConfig::default(),
        );
        (GatewayState::new(Arc::new(control), config), cluster, dir)
    }

    fn setup() -> (TestServer, Arc<MockClusterStore>, TempDir) {
        let (state, cluster, dir) = test_state(GatewayConfig::default());
        let server = TestServer::new(create_router(state)).unwrap();
        (server, cluster, dir)
    }

    fn create_body(name: &str) -> Value {
        json!({
            "name": name,
            "namespace": "default",
            "template_ref": { "repo": "https://templates.test", "path": "web", "version": "v1" },
            "values": {}
        })
    }

    async fn allowed_origin(origins: &[&str], origin: &str) -> Option<String> {
        let config = GatewayConfig {
            cors_origins: origins.iter().map(ToString::to_string).collect(),
            ..GatewayConfig::default()
        };
        let (state, _cluster, _dir) = test_state(config);

        let request = Request::get("/health")
            .header("origin", origin)
            .body(Body::empty())
            .unwrap();
        let response = create_router(state).oneshot(request).await.unwrap();

        response
            .headers()
            .get("access-control-allow-origin")
            .map(|value| value.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn cors_any_origin() {
        let allowed = allowed_origin(&["*"], "https://anywhere.test").await;
        assert_eq!(allowed.as_deref(), Some("*"));
    }

    #[tokio::test]
    async fn cors_specific_origins() {
        let origins = ["http://localhost:3000", "https://app.example.com"];

        let allowed = allowed_origin(&origins, "https://app.example.com").await;
        assert_eq!(allowed.as_deref(), Some("https://app.example.com"));

        let refused = allowed_origin(&origins, "https://evil.test").await;
        assert!(refused.is_none());
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (server, _cluster, _dir) = setup();

        let response = server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "healthy");
    }

    #[tokio::test]
    async fn create_get_and_list() {
        let (server, _cluster, _dir) = setup();

        let response = server.post("/v1/modules").json(&create_body("app")).await;
        response.assert_status(StatusCode::CREATED);
        let created = response.json::<Value>();
        assert_eq!(created["name"], "app");
        assert_eq!(created["generation"], 1);

        let fetched = server.get("/v1/modules/app").await.json::<Value>();
        assert_eq!(fetched["version_token"], created["version_token"]);

        let list = server.get("/v1/modules").await.json::<Value>();
        assert_eq!(list["modules"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_failure_is_detailed() {
        let (server, _cluster, _dir) = setup();

        let response = server
            .post("/v1/modules")
            .json(&create_body("Bad_Name"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let body = response.json::<Value>();
        assert_eq!(body["error"]["kind"], "validation");
        assert!(body["error"]["message"].as_str().unwrap().contains("name"));
    }

    #[tokio::test]
    async fn stale_update_is_conflict() {
        let (server, _cluster, _dir) = setup();
        let created = server
            .post("/v1/modules")
            .json(&create_body("app"))
            .await
            .json::<Value>();

        let update = json!({
            "template_ref": { "repo": "https://templates.test", "path": "web", "version": "v2" },
            "version_token": created["version_token"]
        });
        server
            .put("/v1/modules/app")
            .json(&update)
            .await
            .assert_status_ok();

        let response = server.put("/v1/modules/app").json(&update).await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["error"]["kind"], "conflict");
    }

    #[tokio::test]
    async fn not_found_is_opaque() {
        let (server, _cluster, _dir) = setup();

        let response = server.get("/v1/modules/ghost").await;
        response.assert_status_not_found();

        let body = response.json::<Value>();
        assert_eq!(body["error"]["kind"], "not_found");
        assert!(!body["error"]["message"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn reconcile_then_list_resources() {
        let (server, cluster, _dir) = setup();
        server.post("/v1/modules").json(&create_body("app")).await;

        let plan = server.get("/v1/modules/app/plan").await.json::<Value>();
        assert_eq!(plan["partition"]["to_create"].as_array().unwrap().len(), 2);

        let report = server.post("/v1/modules/app/reconcile").await;
        report.assert_status_ok();
        assert_eq!(report.json::<Value>()["phase"], "settled");
        assert_eq!(cluster.object_count(), 2);

        let resources = server.get("/v1/modules/app/resources").await.json::<Value>();
        let states: Vec<_> = resources["resources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["state"].clone())
            .collect();
        assert_eq!(states, vec![json!("live"), json!("live")]);
    }

    #[tokio::test]
    async fn delete_unowned_resource_is_forbidden() {
        let (server, cluster, _dir) = setup();
        server.post("/v1/modules").json(&create_body("app")).await;
        cluster.insert(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "other", "namespace": "default" }
        }));

        let response = server
            .delete("/v1/modules/app/resources")
            .json(&json!({ "group": "", "version": "v1", "kind": "Service", "namespace": "default", "name": "other" }))
            .await;

        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(cluster.object_count(), 1);
    }

    #[tokio::test]
    async fn template_preview_and_validate() {
        let (server, _cluster, _dir) = setup();
        server.post("/v1/modules").json(&create_body("app")).await;

        let preview = server.get("/v1/modules/app/template").await.json::<Value>();
        assert_eq!(preview["current"], preview["proposed"]);

        let report = server.post("/v1/modules/app/validate").await;
        report.assert_status_ok();
        assert_eq!(report.json::<Value>()["resources"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_module_cascades() {
        let (server, cluster, _dir) = setup();
        server.post("/v1/modules").json(&create_body("app")).await;
        server.post("/v1/modules/app/reconcile").await;

        server
            .delete("/v1/modules/app")
            .await
            .assert_status(StatusCode::NO_CONTENT);
        assert_eq!(cluster.object_count(), 0);
        server.get("/v1/modules/app").await.assert_status_not_found();
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let config = GatewayConfig {
            max_body_bytes: 64,
            ..GatewayConfig::default()
        };
        let (state, _cluster, _dir) = test_state(config);
        let app = create_router(state);

        let body = serde_json::to_vec(&json!({
            "name": "app",
            "namespace": "default",
            "template_ref": { "repo": "x".repeat(256) }
        }))
        .unwrap();
        let request = Request::post("/v1/modules")
            .header("content-type", "application/json")
            .header("content-length", body.len())
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn timed_out_reconcile_records_progress() {
        let config = GatewayConfig {
            request_timeout_seconds: 1,
            ..GatewayConfig::default()
        };
        let (state, cluster, _dir) = test_state(config);
        let server = TestServer::new(create_router(state)).unwrap();
        server.post("/v1/modules").json(&create_body("app")).await;
        cluster.set_write_delay(Some(Duration::from_millis(700)));

        let response = server.post("/v1/modules/app/reconcile").await;
        response.assert_status(StatusCode::REQUEST_TIMEOUT);

        let mut status = Value::Null;
        for _ in 0..50 {
            status = server.get("/v1/modules/app").await.json::<Value>()["status"].clone();
            if !status.is_null() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(status["phase"], "failed");
        assert_eq!(status["created"], 1);
        assert_eq!(cluster.object_count(), 1);
    }
}
