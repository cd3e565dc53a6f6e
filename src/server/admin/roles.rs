use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{CreateRoleRequest, DeleteRoleRequest, RenameRoleRequest};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};

pub async fn create_role(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("Role name cannot be empty"));
    }
    let role = state
        .store
        .create_role(&req.name, req.description.as_deref())
        .api_err("Failed to create role")?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(role))))
}

/// Renaming a reserved role surfaces as a 400 via the store's Conflict.
pub async fn rename_role(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<RenameRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("Role name cannot be empty"));
    }
    let role = state
        .store
        .get_role(req.role_id)
        .api_err("Failed to look up role")?
        .or_not_found("Role not found")?;
    state
        .store
        .rename_role(role.id, &req.name, role.description.as_deref())
        .api_err("Failed to rename role")?;
    let role = state
        .store
        .get_role(req.role_id)
        .api_err("Failed to look up role")?
        .or_not_found("Role not found")?;
    Ok(Json(ApiResponse::success(role)))
}

pub async fn delete_role(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state
        .store
        .delete_role(req.role_id)
        .api_err("Failed to delete role")?
    {
        return Err(ApiError::not_found("Role not found"));
    }
    Ok(Json(ApiResponse::success(serde_json::json!({ "deleted": req.role_id }))))
}

pub async fn list_roles(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let roles = state.store.list_roles().api_err("Failed to list roles")?;
    Ok(Json(ApiResponse::success(roles)))
}
