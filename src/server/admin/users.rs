use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{
    CreateUserRequest, DeleteUserRequest, SetUserPasswordRequest, SetUserRolesRequest,
    UpdateUserRequest,
};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};

fn resolve_role_ids(state: &AppState, role_names: &[String]) -> Result<Vec<i64>, ApiError> {
    let mut ids = Vec::with_capacity(role_names.len());
    for name in role_names {
        let role = state
            .store
            .get_role_by_name(name)
            .api_err("Failed to look up role")?
            .ok_or_else(|| ApiError::bad_request(format!("Unknown role: {name}")))?;
        ids.push(role.id);
    }
    Ok(ids)
}

pub async fn create_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.trim().is_empty() || req.username.contains(char::is_whitespace) {
        return Err(ApiError::bad_request(
            "Username cannot be empty or contain whitespace",
        ));
    }
    if req.password.is_empty() {
        return Err(ApiError::bad_request("Password cannot be empty"));
    }

    let role_ids = resolve_role_ids(&state, &req.role_names)?;
    let hash = state
        .hasher
        .hash(&req.password)
        .api_err("Failed to hash password")?;

    let user = state
        .store
        .create_user(&req.username, req.email.as_deref(), &hash)
        .api_err("Failed to create user")?;
    state
        .store
        .set_user_roles(user.id, &role_ids)
        .api_err("Failed to assign roles")?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(user))))
}

pub async fn update_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_user(req.user_id)
        .api_err("Failed to look up user")?
        .or_not_found("User not found")?;
    state
        .store
        .update_user(req.user_id, &req.username, req.email.as_deref())
        .api_err("Failed to update user")?;
    let user = state
        .store
        .get_user(req.user_id)
        .api_err("Failed to look up user")?
        .or_not_found("User not found")?;
    Ok(Json(ApiResponse::success(user)))
}

pub async fn delete_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state
        .store
        .delete_user(req.user_id)
        .api_err("Failed to delete user")?
    {
        return Err(ApiError::not_found("User not found"));
    }
    Ok(Json(ApiResponse::success(serde_json::json!({ "deleted": req.user_id }))))
}

pub async fn set_user_password(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetUserPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.password.is_empty() {
        return Err(ApiError::bad_request("Password cannot be empty"));
    }
    state
        .store
        .get_user(req.user_id)
        .api_err("Failed to look up user")?
        .or_not_found("User not found")?;
    let hash = state
        .hasher
        .hash(&req.password)
        .api_err("Failed to hash password")?;
    state
        .store
        .set_user_password(req.user_id, &hash)
        .api_err("Failed to set password")?;
    Ok(Json(ApiResponse::success(serde_json::json!({ "user_id": req.user_id }))))
}

pub async fn set_user_roles(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetUserRolesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_user(req.user_id)
        .api_err("Failed to look up user")?
        .or_not_found("User not found")?;
    let role_ids = resolve_role_ids(&state, &req.role_names)?;
    state
        .store
        .set_user_roles(req.user_id, &role_ids)
        .api_err("Failed to assign roles")?;
    Ok(Json(ApiResponse::success(serde_json::json!({ "user_id": req.user_id }))))
}

pub async fn list_users(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state.store.list_users().api_err("Failed to list users")?;
    Ok(Json(ApiResponse::success(users)))
}
