//! Module management endpoints.
//!
//! This module provides handlers for module CRUD, template previews and
//! reconciliation.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use modsync_control::{
    CancelSignal, ControlError, CreateModuleRequest, Module, ModuleControl, ModuleName,
    ModuleSpec, ModuleStatus, UpdateModuleRequest,
};

use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response for a single module.
#[derive(Debug, Serialize)]
pub struct ModuleResponse {
    /// Module name.
    pub name: String,
    /// Namespace the module deploys into.
    pub namespace: String,
    /// Template reference and values.
    pub spec: ModuleSpec,
    /// Token to present on the next update.
    pub version_token: String,
    /// Spec generation.
    pub generation: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last spec update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Outcome of the last reconcile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ModuleStatus>,
}

impl From<Module> for ModuleResponse {
    fn from(module: Module) -> Self {
        Self {
            name: module.name.to_string(),
            namespace: module.namespace,
            spec: module.spec,
            version_token: module.version_token.to_string(),
            generation: module.generation,
            created_at: module.created_at,
            updated_at: module.updated_at,
            status: module.status,
        }
    }
}

/// Response for module list.
#[derive(Debug, Serialize)]
pub struct ListModulesResponse {
    /// Modules ordered by name.
    pub modules: Vec<ModuleResponse>,
}

/// Parse a module name from a path segment.
pub(crate) fn parse_module_name(raw: &str) -> Result<ModuleName, ApiError> {
    ModuleName::new(raw).map_err(|_| ApiError::BadRequest("invalid module name".to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

/// List all modules.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub async fn list_modules<C>(
    State(state): State<Arc<GatewayState<C>>>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let modules = state.control.list_modules().await?;

    Ok(Json(ListModulesResponse {
        modules: modules.into_iter().map(ModuleResponse::from).collect(),
    }))
}

/// Create a new module.
///
/// # Errors
///
/// Returns a detailed error if the request is invalid or the name is taken.
pub async fn create_module<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Json(body): Json<CreateModuleRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let module = state
        .control
        .create_module(body)
        .await
        .map_err(|e| ApiError::detailed(&e))?;

    Ok((StatusCode::CREATED, Json(ModuleResponse::from(module))))
}

/// Get a single module.
///
/// # Errors
///
/// Returns an error if the module is not found.
pub async fn get_module<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let name = parse_module_name(&name)?;
    let module = state.control.get_module(&name).await?;

    Ok(Json(ModuleResponse::from(module)))
}

/// Replace a module's spec.
///
/// # Errors
///
/// Returns a detailed error if the token is stale, the module is missing, or
/// the request is invalid.
pub async fn update_module<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(name): Path<String>,
    Json(body): Json<UpdateModuleRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let name = parse_module_name(&name)?;
    let module = state
        .control
        .update_module(&name, body)
        .await
        .map_err(|e| ApiError::detailed(&e))?;

    Ok(Json(ModuleResponse::from(module)))
}

/// Delete a module and everything it owns.
///
/// # Errors
///
/// Returns an error if the module is missing or an owned resource could not
/// be deleted.
pub async fn delete_module<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let name = parse_module_name(&name)?;
    state.control.delete_module(&name).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Render the stored spec.
///
/// # Errors
///
/// Returns an error if the template cannot be fetched or rendered.
pub async fn get_template<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let name = parse_module_name(&name)?;
    let preview = state.control.preview_template(&name, None).await?;

    Ok(Json(preview))
}

/// Render the stored spec next to a proposed one.
///
/// # Errors
///
/// Returns an error if either spec cannot be rendered.
pub async fn preview_template<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(name): Path<String>,
    Json(proposed): Json<ModuleSpec>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let name = parse_module_name(&name)?;
    let preview = state.control.preview_template(&name, Some(proposed)).await?;

    Ok(Json(preview))
}

/// Show what a reconcile would change.
///
/// # Errors
///
/// Returns an error if rendering or the ownership lookup fails.
pub async fn plan_module<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let name = parse_module_name(&name)?;
    let plan = state.control.plan_module(&name).await?;

    Ok(Json(plan))
}

/// Reconcile a module now.
///
/// The reconcile is cancelled if the server shuts down or the request is
/// dropped (client disconnect or request timeout); its progress is still
/// recorded in the module status.
///
/// # Errors
///
/// Returns an error if any step of the reconcile fails.
pub async fn reconcile_module<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let name = parse_module_name(&name)?;

    // The run is detached so that a dropped request cancels it through the
    // guard instead of abandoning it mid-apply.
    let (handle, signal) = CancelSignal::new();
    let guard = handle.cancel_on_drop();
    let control = Arc::clone(&state.control);
    let mut task = tokio::spawn(async move { control.reconcile_module(&name, signal).await });

    let mut shutdown = state.shutdown.clone();
    let joined = tokio::select! {
        joined = &mut task => joined,
        () = shutdown.cancelled() => {
            guard.cancel();
            task.await
        }
    };

    let report = joined
        .map_err(|e| ControlError::Internal(format!("reconcile task failed: {e}")))??;
    Ok(Json(report))
}

/// Check that a module renders to well-formed manifests.
///
/// # Errors
///
/// Returns an error if the render fails.
pub async fn validate_module<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let name = parse_module_name(&name)?;
    let report = state.control.validate_module(&name).await?;

    Ok(Json(report))
}
