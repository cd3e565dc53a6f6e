use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};

use crate::auth::AuthUser;
use crate::server::AppState;
use crate::server::access;
use crate::server::dto::{DeleteBagRequest, SetAclRequest, UpsertBagRequest};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::validation::validate_bag_name;
use crate::types::{AclEntry, Bag, Permission};

/// Creates a bag or updates its description. Creation requires a logged-in
/// caller and the new bag is owned by them; site admins create unowned
/// (open) bags. Updates require ADMIN on the bag.
pub async fn upsert_bag(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<UpsertBagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let is_site_admin = state.user_is_admin(&user);
    validate_bag_name(&req.name, is_site_admin)?;

    let existing = state
        .store
        .get_bag_by_name(&req.name)
        .api_err("Failed to look up bag")?;

    let owner_id = match &existing {
        Some(_) => {
            let grant = access::require_bag_admin(state.store.as_ref(), &user, &req.name)?;
            grant.bag.owner_id
        }
        None => {
            if !user.is_logged_in() {
                return Err(ApiError::unauthorized("Login required to create bags"));
            }
            if is_site_admin { None } else { Some(user.id) }
        }
    };

    let bag = state
        .store
        .upsert_bag(&req.name, &req.description, owner_id)
        .api_err("Failed to upsert bag")?;
    Ok(Json(ApiResponse::success(bag)))
}

pub async fn delete_bag(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<DeleteBagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let grant = access::require_bag_admin(state.store.as_ref(), &user, &req.name)?;
    state
        .store
        .delete_bag(grant.bag.id)
        .api_err("Failed to delete bag")?;
    Ok(Json(ApiResponse::success(serde_json::json!({ "deleted": req.name }))))
}

pub(super) fn resolve_acl_entries(
    state: &AppState,
    entries: &[crate::server::dto::AclEntryRequest],
) -> Result<Vec<AclEntry>, ApiError> {
    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        let role = state
            .store
            .get_role_by_name(&entry.role_name)
            .api_err("Failed to look up role")?
            .ok_or_else(|| {
                ApiError::bad_request(format!("Unknown role: {}", entry.role_name))
            })?;
        resolved.push(AclEntry {
            role_id: role.id,
            permission: entry.permission,
        });
    }
    Ok(resolved)
}

pub async fn set_bag_acl(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<SetAclRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let grant = access::require_bag_admin(state.store.as_ref(), &user, &req.name)?;
    let entries = resolve_acl_entries(&state, &req.entries)?;
    state
        .store
        .set_bag_acl(grant.bag.id, &entries)
        .api_err("Failed to set bag ACL")?;
    Ok(Json(ApiResponse::success(serde_json::json!({ "name": req.name }))))
}

/// Lists the bags the caller can read.
pub async fn list_bags(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let mut readable: Vec<Bag> = Vec::new();
    for bag in state.store.list_bags().api_err("Failed to list bags")? {
        if access::check_bag_permission(state.store.as_ref(), &user, &bag, Permission::Read)
            .api_err("Failed to check bag permission")?
        {
            readable.push(bag);
        }
    }
    Ok(Json(ApiResponse::success(readable)))
}
