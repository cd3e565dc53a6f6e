use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Permission;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Role ids, resolved at authentication time.
    #[serde(skip)]
    pub role_ids: Vec<i64>,
}

impl User {
    /// Sentinel identity for unauthenticated requests: no id, no roles.
    /// Permission code treats it like any other user instead of branching
    /// on identity presence.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            id: 0,
            username: String::new(),
            email: None,
            created_at: DateTime::<Utc>::MIN_UTC,
            role_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.id != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Role names that initialize() seeds and the admin API refuses to mutate.
pub const RESERVED_ROLES: [&str; 2] = ["ADMIN", "USER"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bag {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
    /// Plugin bundles the wiki shell should load for this recipe.
    pub plugin_names: Vec<String>,
    pub skip_required_plugins: bool,
    pub skip_core: bool,
    pub created_at: DateTime<Utc>,
}

/// One entry of a recipe's ordered bag list. Position 0 is the writable bag;
/// lower positions shadow higher ones when merging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeBag {
    pub bag_id: i64,
    pub bag_name: String,
    pub position: i64,
    /// When true, a user with ADMIN on the recipe inherits access to this
    /// bag through the link.
    pub with_acl: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclEntry {
    pub role_id: i64,
    pub permission: Permission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Metadata row of a tiddler revision, used in sync state payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiddlerInfo {
    pub title: String,
    pub revision_id: i64,
    pub is_deleted: bool,
}

/// A current tiddler revision with its fields, as read from one bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiddlerData {
    pub title: String,
    pub revision_id: i64,
    pub is_deleted: bool,
    pub fields: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_hash: Option<String>,
}

/// Per-bag state list returned by the bag-states endpoints, in recipe order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BagState {
    pub bag_name: String,
    pub position: i64,
    pub tiddlers: Vec<TiddlerInfo>,
}
