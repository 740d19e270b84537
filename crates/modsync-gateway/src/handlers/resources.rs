//! Owned resource endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use modsync_control::{ModuleControl, ResourceIdentity, TrackedResource};

use crate::error::ApiError;
use crate::handlers::modules::parse_module_name;
use crate::state::GatewayState;

/// Response for the resource listing.
#[derive(Debug, Serialize)]
pub struct ResourcesResponse {
    /// Owned and missing resources, ordered by identity.
    pub resources: Vec<TrackedResource>,
}

/// List the resources a module owns or should own.
///
/// # Errors
///
/// Returns an error if the module is missing, the render fails, or the
/// cluster lookup fails.
pub async fn list_resources<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let name = parse_module_name(&name)?;
    let resources = state.control.list_resources(&name).await?;

    Ok(Json(ResourcesResponse { resources }))
}

/// Delete one resource the module owns.
///
/// The body is the resource identity.
///
/// # Errors
///
/// Returns an error if the resource is missing or not owned by the module.
pub async fn delete_resource<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(name): Path<String>,
    Json(identity): Json<ResourceIdentity>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ModuleControl + 'static,
{
    let name = parse_module_name(&name)?;
    state
        .control
        .delete_owned_resource(&name, &identity)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
