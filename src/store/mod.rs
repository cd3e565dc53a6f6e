mod schema;
mod sqlite;
pub mod view;

pub use sqlite::SqliteStore;

use std::collections::HashMap;

use crate::error::Result;
use crate::types::*;

/// Options for bag/recipe state and merged-view queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Only return revisions newer than this cursor.
    pub last_known_revision_id: Option<i64>,
    /// Include tombstone revisions in the result.
    pub include_deleted: bool,
}

/// A recipe-bag link seen from the bag side, used for permission inheritance.
#[derive(Debug, Clone)]
pub struct BagRecipeLink {
    pub recipe_id: i64,
    pub position: i64,
    pub with_acl: bool,
}

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(&self, username: &str, email: Option<&str>, password_hash: &str)
    -> Result<User>;
    fn get_user(&self, id: i64) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    fn get_user_password_hash(&self, id: i64) -> Result<Option<String>>;
    fn list_users(&self) -> Result<Vec<User>>;
    fn update_user(&self, id: i64, username: &str, email: Option<&str>) -> Result<()>;
    fn set_user_password(&self, id: i64, password_hash: &str) -> Result<()>;
    fn delete_user(&self, id: i64) -> Result<bool>;
    fn set_user_roles(&self, user_id: i64, role_ids: &[i64]) -> Result<()>;

    // Role operations
    fn create_role(&self, name: &str, description: Option<&str>) -> Result<Role>;
    fn get_role(&self, id: i64) -> Result<Option<Role>>;
    fn get_role_by_name(&self, name: &str) -> Result<Option<Role>>;
    fn list_roles(&self) -> Result<Vec<Role>>;
    fn rename_role(&self, id: i64, name: &str, description: Option<&str>) -> Result<()>;
    fn delete_role(&self, id: i64) -> Result<bool>;

    // Session operations
    fn create_session(&self, user_id: i64) -> Result<Session>;
    fn get_session(&self, id: &str) -> Result<Option<Session>>;
    fn delete_session(&self, id: &str) -> Result<bool>;

    // Bag operations
    fn upsert_bag(&self, name: &str, description: &str, owner_id: Option<i64>) -> Result<Bag>;
    fn get_bag(&self, id: i64) -> Result<Option<Bag>>;
    fn get_bag_by_name(&self, name: &str) -> Result<Option<Bag>>;
    fn list_bags(&self) -> Result<Vec<Bag>>;
    fn delete_bag(&self, id: i64) -> Result<()>;
    fn set_bag_acl(&self, bag_id: i64, entries: &[AclEntry]) -> Result<()>;
    fn bag_acl(&self, bag_id: i64) -> Result<Vec<AclEntry>>;
    fn bag_recipe_links(&self, bag_id: i64) -> Result<Vec<BagRecipeLink>>;

    // Recipe operations
    #[allow(clippy::too_many_arguments)]
    fn upsert_recipe(
        &self,
        name: &str,
        description: &str,
        owner_id: Option<i64>,
        bags: &[(String, bool)],
        plugin_names: &[String],
        skip_required_plugins: bool,
        skip_core: bool,
    ) -> Result<Recipe>;
    fn get_recipe(&self, id: i64) -> Result<Option<Recipe>>;
    fn get_recipe_by_name(&self, name: &str) -> Result<Option<Recipe>>;
    fn list_recipes(&self) -> Result<Vec<Recipe>>;
    fn delete_recipe(&self, id: i64) -> Result<bool>;
    fn recipe_bags(&self, recipe_id: i64) -> Result<Vec<RecipeBag>>;
    fn set_recipe_acl(&self, recipe_id: i64, entries: &[AclEntry]) -> Result<()>;
    fn recipe_acl(&self, recipe_id: i64) -> Result<Vec<AclEntry>>;

    // Tiddler operations
    fn save_tiddler(
        &self,
        bag_id: i64,
        fields: &HashMap<String, String>,
        attachment_hash: Option<&str>,
    ) -> Result<i64>;
    fn delete_tiddler(&self, bag_id: i64, title: &str) -> Result<i64>;
    fn tiddler(&self, bag_id: i64, title: &str) -> Result<Option<TiddlerData>>;
    fn bag_state(&self, bag_id: i64, opts: SyncOptions) -> Result<Vec<TiddlerInfo>>;
    fn read_bag_tiddlers(&self, bag_id: i64, opts: SyncOptions) -> Result<Vec<TiddlerData>>;
    fn empty_bag(&self, bag_id: i64) -> Result<()>;
    fn max_revision_id(&self) -> Result<i64>;

    // Bootstrap check
    fn has_admin_user(&self) -> Result<bool>;
}
