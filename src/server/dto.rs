use serde::{Deserialize, Serialize};

use crate::types::Permission;

fn yes_no_default() -> String {
    "no".to_string()
}

/// Query parameters shared by the sync read endpoints.
#[derive(Debug, Deserialize)]
pub struct SyncParams {
    pub last_known_revision_id: Option<i64>,
    #[serde(default = "yes_no_default")]
    pub include_deleted: String,
    #[serde(default = "yes_no_default")]
    pub gzip_stream: String,
}

impl SyncParams {
    #[must_use]
    pub fn include_deleted(&self) -> bool {
        self.include_deleted == "yes"
    }

    #[must_use]
    pub fn gzip_stream(&self) -> bool {
        self.gzip_stream == "yes"
    }
}

#[derive(Debug, Deserialize)]
pub struct EventParams {
    pub last_known_revision_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WikiParams {
    /// "yes" embeds plugin bundles in the page instead of `<script src>`
    /// references.
    #[serde(default = "yes_no_default")]
    pub inline_plugins: String,
}

impl WikiParams {
    #[must_use]
    pub fn inline_plugins(&self) -> bool {
        self.inline_plugins == "yes"
    }
}

// Admin operation envelopes

#[derive(Debug, Deserialize)]
pub struct UpsertBagRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteBagRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RecipeBagSpec {
    pub bag_name: String,
    #[serde(default)]
    pub with_acl: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpsertRecipeRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Ordered; the first entry becomes the writable bag at position 0.
    pub bags: Vec<RecipeBagSpec>,
    #[serde(default)]
    pub plugin_names: Vec<String>,
    #[serde(default)]
    pub skip_required_plugins: bool,
    #[serde(default)]
    pub skip_core: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRecipeRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AclEntryRequest {
    pub role_name: String,
    pub permission: Permission,
}

#[derive(Debug, Deserialize)]
pub struct SetAclRequest {
    pub name: String,
    pub entries: Vec<AclEntryRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    #[serde(default)]
    pub role_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub user_id: i64,
    pub username: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserRequest {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetUserPasswordRequest {
    pub user_id: i64,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SetUserRolesRequest {
    pub user_id: i64,
    pub role_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRoleRequest {
    pub role_id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRoleRequest {
    pub role_id: i64,
}

// Login exchange envelopes. The blobs are opaque to clients; see
// auth::password for their layout.

#[derive(Debug, Deserialize)]
pub struct LoginStartRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct LoginStartResponse {
    pub exchange_id: String,
    pub challenge: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginFinishRequest {
    pub exchange_id: String,
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct LoginFinishResponse {
    pub username: String,
}
