use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};

use crate::auth::AuthUser;
use crate::server::AppState;
use crate::server::access;
use crate::server::dto::{DeleteRecipeRequest, SetAclRequest, UpsertRecipeRequest};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::validation::validate_recipe_name;
use crate::types::{Permission, Recipe};

use super::bags::resolve_acl_entries;

/// Creates a recipe or replaces its description, bag list, and plugin
/// selection. Same ownership rules as bags: creation requires login,
/// updates require ADMIN on the recipe.
pub async fn upsert_recipe(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<UpsertRecipeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let is_site_admin = state.user_is_admin(&user);
    validate_recipe_name(&req.name, is_site_admin)?;

    let existing = state
        .store
        .get_recipe_by_name(&req.name)
        .api_err("Failed to look up recipe")?;

    let owner_id = match existing {
        Some(_) => {
            let recipe = access::require_recipe_admin(state.store.as_ref(), &user, &req.name)?;
            recipe.owner_id
        }
        None => {
            if !user.is_logged_in() {
                return Err(ApiError::unauthorized("Login required to create recipes"));
            }
            if is_site_admin { None } else { Some(user.id) }
        }
    };

    let bags: Vec<(String, bool)> = req
        .bags
        .iter()
        .map(|b| (b.bag_name.clone(), b.with_acl))
        .collect();

    let recipe = state
        .store
        .upsert_recipe(
            &req.name,
            &req.description,
            owner_id,
            &bags,
            &req.plugin_names,
            req.skip_required_plugins,
            req.skip_core,
        )
        .api_err("Failed to upsert recipe")?;
    Ok(Json(ApiResponse::success(recipe)))
}

pub async fn delete_recipe(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<DeleteRecipeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let recipe = access::require_recipe_admin(state.store.as_ref(), &user, &req.name)?;
    state
        .store
        .delete_recipe(recipe.id)
        .api_err("Failed to delete recipe")?;
    Ok(Json(ApiResponse::success(serde_json::json!({ "deleted": req.name }))))
}

pub async fn set_recipe_acl(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<SetAclRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let recipe = access::require_recipe_admin(state.store.as_ref(), &user, &req.name)?;
    let entries = resolve_acl_entries(&state, &req.entries)?;
    state
        .store
        .set_recipe_acl(recipe.id, &entries)
        .api_err("Failed to set recipe ACL")?;
    Ok(Json(ApiResponse::success(serde_json::json!({ "name": req.name }))))
}

/// Lists the recipes the caller can read.
pub async fn list_recipes(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let mut readable: Vec<Recipe> = Vec::new();
    for recipe in state.store.list_recipes().api_err("Failed to list recipes")? {
        if access::check_recipe_permission(state.store.as_ref(), &user, &recipe, Permission::Read)
            .api_err("Failed to check recipe permission")?
        {
            readable.push(recipe);
        }
    }
    Ok(Json(ApiResponse::success(readable)))
}
