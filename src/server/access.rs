//! Permission resolution for bags and recipes.
//!
//! Verdicts are computed from three arms: resource ownership, (role,
//! permission) ACL rows, and — for bags only — inheritance through a
//! `with_acl` recipe link whose recipe the user can ADMIN. A resource with
//! neither an owner nor any ACL rows is open to everyone
//! (`open_when_unconfigured`): no configuration means public, which is the
//! common case for shared wikis. Callers must not rely on it for resources
//! they expect to be restricted.

use crate::error::Result as StoreResult;
use crate::server::response::{ApiError, StoreOptionExt, StoreResultExt};
use crate::store::Store;
use crate::types::{AclEntry, Bag, Permission, Recipe, RecipeBag, User};

/// Proof that bag READ was asserted for this request. Sync handlers obtain
/// bag ids only through grants, so a store operation cannot run before its
/// access check.
#[derive(Debug)]
pub struct BagReadGrant {
    pub bag: Bag,
}

/// Proof that bag WRITE was asserted.
#[derive(Debug)]
pub struct BagWriteGrant {
    pub bag: Bag,
}

/// Proof that recipe READ was asserted; carries the ordered bag list so the
/// handler does not re-resolve membership.
#[derive(Debug)]
pub struct RecipeReadGrant {
    pub recipe: Recipe,
    pub bags: Vec<RecipeBag>,
}

/// Proof that recipe WRITE was asserted. All writes through a recipe target
/// `writable`, the bag at position 0.
#[derive(Debug)]
pub struct RecipeWriteGrant {
    pub recipe: Recipe,
    pub writable: RecipeBag,
}

/// Site admins (holders of the reserved ADMIN role) bypass resource checks.
pub fn user_is_site_admin(store: &dyn Store, user: &User) -> StoreResult<bool> {
    if !user.is_logged_in() {
        return Ok(false);
    }
    let Some(admin) = store.get_role_by_name("ADMIN")? else {
        return Ok(false);
    };
    Ok(user.role_ids.contains(&admin.id))
}

fn is_owner(user: &User, owner_id: Option<i64>) -> bool {
    user.is_logged_in() && owner_id == Some(user.id)
}

fn open_when_unconfigured(owner_id: Option<i64>, acl: &[AclEntry]) -> bool {
    owner_id.is_none() && acl.is_empty()
}

fn acl_grants(user: &User, acl: &[AclEntry], required: Permission) -> bool {
    acl.iter().any(|entry| {
        user.role_ids.contains(&entry.role_id) && entry.permission.satisfies(required)
    })
}

/// Whether the user can ADMIN a recipe, consulting only the recipe's own
/// owner and ACL rows. Used for the bag inheritance arm, which must not
/// recurse back through bag permissions.
fn can_admin_recipe(store: &dyn Store, user: &User, recipe: &Recipe) -> StoreResult<bool> {
    if is_owner(user, recipe.owner_id) {
        return Ok(true);
    }
    let acl = store.recipe_acl(recipe.id)?;
    if open_when_unconfigured(recipe.owner_id, &acl) {
        return Ok(true);
    }
    Ok(acl_grants(user, &acl, Permission::Admin))
}

pub fn check_bag_permission(
    store: &dyn Store,
    user: &User,
    bag: &Bag,
    required: Permission,
) -> StoreResult<bool> {
    if user_is_site_admin(store, user)? {
        return Ok(true);
    }
    if is_owner(user, bag.owner_id) {
        return Ok(true);
    }

    let acl = store.bag_acl(bag.id)?;
    if open_when_unconfigured(bag.owner_id, &acl) {
        return Ok(true);
    }
    if acl_grants(user, &acl, required) {
        return Ok(true);
    }

    // Inheritance: a with_acl recipe link opens the bag to recipe admins —
    // any position for READ, position 0 only for WRITE. ADMIN itself never
    // travels this path.
    if required == Permission::Admin {
        return Ok(false);
    }
    for link in store.bag_recipe_links(bag.id)? {
        if !link.with_acl {
            continue;
        }
        if required == Permission::Write && link.position != 0 {
            continue;
        }
        if let Some(recipe) = store.get_recipe(link.recipe_id)? {
            if can_admin_recipe(store, user, &recipe)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

pub fn check_recipe_permission(
    store: &dyn Store,
    user: &User,
    recipe: &Recipe,
    required: Permission,
) -> StoreResult<bool> {
    if user_is_site_admin(store, user)? {
        return Ok(true);
    }
    if is_owner(user, recipe.owner_id) {
        return Ok(true);
    }

    match required {
        // READ needs every member bag readable
        Permission::Read => {
            for recipe_bag in store.recipe_bags(recipe.id)? {
                let Some(bag) = store.get_bag(recipe_bag.bag_id)? else {
                    return Ok(false);
                };
                if !check_bag_permission(store, user, &bag, Permission::Read)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        // WRITE only ever consults the bag at position 0
        Permission::Write => {
            let bags = store.recipe_bags(recipe.id)?;
            let Some(writable) = bags.first() else {
                return Ok(false);
            };
            let Some(bag) = store.get_bag(writable.bag_id)? else {
                return Ok(false);
            };
            check_bag_permission(store, user, &bag, Permission::Write)
        }
        Permission::Admin => can_admin_recipe(store, user, recipe),
    }
}

/// Composes the existence check and the read/write checks, raising the
/// narrowest applicable failure: 404 for an unknown bag, then 403 read,
/// then 403 write.
pub fn require_bag_read(
    store: &dyn Store,
    user: &User,
    bag_name: &str,
) -> Result<BagReadGrant, ApiError> {
    let bag = store
        .get_bag_by_name(bag_name)
        .api_err("Failed to look up bag")?
        .or_not_found("Bag not found")?;
    if !check_bag_permission(store, user, &bag, Permission::Read)
        .api_err("Failed to check bag permission")?
    {
        return Err(ApiError::forbidden_read());
    }
    Ok(BagReadGrant { bag })
}

pub fn require_bag_write(
    store: &dyn Store,
    user: &User,
    bag_name: &str,
) -> Result<BagWriteGrant, ApiError> {
    let read = require_bag_read(store, user, bag_name)?;
    if !check_bag_permission(store, user, &read.bag, Permission::Write)
        .api_err("Failed to check bag permission")?
    {
        return Err(ApiError::forbidden_write());
    }
    Ok(BagWriteGrant { bag: read.bag })
}

pub fn require_bag_admin(
    store: &dyn Store,
    user: &User,
    bag_name: &str,
) -> Result<BagWriteGrant, ApiError> {
    let write = require_bag_write(store, user, bag_name)?;
    if !check_bag_permission(store, user, &write.bag, Permission::Admin)
        .api_err("Failed to check bag permission")?
    {
        return Err(ApiError::forbidden_write());
    }
    Ok(write)
}

pub fn require_recipe_read(
    store: &dyn Store,
    user: &User,
    recipe_name: &str,
) -> Result<RecipeReadGrant, ApiError> {
    let recipe = store
        .get_recipe_by_name(recipe_name)
        .api_err("Failed to look up recipe")?
        .or_not_found("Recipe not found")?;
    if !check_recipe_permission(store, user, &recipe, Permission::Read)
        .api_err("Failed to check recipe permission")?
    {
        return Err(ApiError::forbidden_read());
    }
    let bags = store
        .recipe_bags(recipe.id)
        .api_err("Failed to load recipe bags")?;
    Ok(RecipeReadGrant { recipe, bags })
}

pub fn require_recipe_write(
    store: &dyn Store,
    user: &User,
    recipe_name: &str,
) -> Result<RecipeWriteGrant, ApiError> {
    let read = require_recipe_read(store, user, recipe_name)?;
    if !check_recipe_permission(store, user, &read.recipe, Permission::Write)
        .api_err("Failed to check recipe permission")?
    {
        return Err(ApiError::forbidden_write());
    }
    let writable = read
        .bags
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::conflict("Recipe has no bags"))?;
    Ok(RecipeWriteGrant {
        recipe: read.recipe,
        writable,
    })
}

/// ADMIN over a recipe, used by the admin surface. Does not imply the
/// member-bag read walk; recipe administration is about the recipe row.
pub fn require_recipe_admin(
    store: &dyn Store,
    user: &User,
    recipe_name: &str,
) -> Result<Recipe, ApiError> {
    let recipe = store
        .get_recipe_by_name(recipe_name)
        .api_err("Failed to look up recipe")?
        .or_not_found("Recipe not found")?;
    if !check_recipe_permission(store, user, &recipe, Permission::Admin)
        .api_err("Failed to check recipe permission")?
    {
        return Err(ApiError::forbidden_write());
    }
    Ok(recipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn setup() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    fn make_user(store: &dyn Store, username: &str, roles: &[i64]) -> User {
        let user = store.create_user(username, None, "x").unwrap();
        store.set_user_roles(user.id, roles).unwrap();
        store.get_user(user.id).unwrap().unwrap()
    }

    #[test]
    fn test_unconfigured_bag_is_open_to_anonymous() {
        let store = setup();
        let bag = store.upsert_bag("notes", "", None).unwrap();
        let anon = User::anonymous();
        for p in [Permission::Read, Permission::Write, Permission::Admin] {
            assert!(check_bag_permission(&store, &anon, &bag, p).unwrap());
        }
    }

    #[test]
    fn test_acl_row_closes_bag_to_roleless_user() {
        let store = setup();
        let bag = store.upsert_bag("notes", "", None).unwrap();
        let role = store.create_role("editors", None).unwrap();
        store
            .set_bag_acl(
                bag.id,
                &[AclEntry {
                    role_id: role.id,
                    permission: Permission::Read,
                }],
            )
            .unwrap();

        let outsider = make_user(&store, "outsider", &[]);
        assert!(!check_bag_permission(&store, &outsider, &bag, Permission::Read).unwrap());

        let editor = make_user(&store, "editor", &[role.id]);
        assert!(check_bag_permission(&store, &editor, &bag, Permission::Read).unwrap());
        assert!(!check_bag_permission(&store, &editor, &bag, Permission::Write).unwrap());
    }

    #[test]
    fn test_write_grant_implies_read() {
        let store = setup();
        let bag = store.upsert_bag("notes", "", None).unwrap();
        let role = store.create_role("writers", None).unwrap();
        store
            .set_bag_acl(
                bag.id,
                &[AclEntry {
                    role_id: role.id,
                    permission: Permission::Write,
                }],
            )
            .unwrap();

        let writer = make_user(&store, "writer", &[role.id]);
        assert!(check_bag_permission(&store, &writer, &bag, Permission::Write).unwrap());
        assert!(check_bag_permission(&store, &writer, &bag, Permission::Read).unwrap());
    }

    #[test]
    fn test_owner_passes_regardless_of_acl() {
        let store = setup();
        let owner = make_user(&store, "owner", &[]);
        let bag = store.upsert_bag("private", "", Some(owner.id)).unwrap();
        let role = store.create_role("others", None).unwrap();
        store
            .set_bag_acl(
                bag.id,
                &[AclEntry {
                    role_id: role.id,
                    permission: Permission::Read,
                }],
            )
            .unwrap();

        for p in [Permission::Read, Permission::Write, Permission::Admin] {
            assert!(check_bag_permission(&store, &owner, &bag, p).unwrap());
        }
        // owned, so anonymous is shut out despite no matching row
        let anon = User::anonymous();
        assert!(!check_bag_permission(&store, &anon, &bag, Permission::Read).unwrap());
    }

    #[test]
    fn test_site_admin_bypasses_checks() {
        let store = setup();
        let admin_role = store.get_role_by_name("ADMIN").unwrap().unwrap();
        let admin = make_user(&store, "root", &[admin_role.id]);
        let owner = make_user(&store, "owner", &[]);
        let bag = store.upsert_bag("private", "", Some(owner.id)).unwrap();
        assert!(check_bag_permission(&store, &admin, &bag, Permission::Admin).unwrap());
    }

    #[test]
    fn test_recipe_admin_inherits_bag_access_through_with_acl_link() {
        let store = setup();
        let owner = make_user(&store, "owner", &[]);
        store.upsert_bag("top", "", Some(owner.id)).unwrap();
        store.upsert_bag("base", "", Some(owner.id)).unwrap();
        let recipe = store
            .upsert_recipe(
                "wiki",
                "",
                None,
                &[("top".to_string(), true), ("base".to_string(), true)],
                &[],
                false,
                false,
            )
            .unwrap();
        let role = store.create_role("curators", None).unwrap();
        store
            .set_recipe_acl(
                recipe.id,
                &[AclEntry {
                    role_id: role.id,
                    permission: Permission::Admin,
                }],
            )
            .unwrap();

        let curator = make_user(&store, "curator", &[role.id]);
        let top = store.get_bag_by_name("top").unwrap().unwrap();
        let base = store.get_bag_by_name("base").unwrap().unwrap();

        // position 0: read and write inherit; position 1: read only
        assert!(check_bag_permission(&store, &curator, &top, Permission::Read).unwrap());
        assert!(check_bag_permission(&store, &curator, &top, Permission::Write).unwrap());
        assert!(check_bag_permission(&store, &curator, &base, Permission::Read).unwrap());
        assert!(!check_bag_permission(&store, &curator, &base, Permission::Write).unwrap());

        // ADMIN is never inherited through the recipe path
        assert!(!check_bag_permission(&store, &curator, &top, Permission::Admin).unwrap());
    }

    #[test]
    fn test_recipe_read_requires_every_bag() {
        let store = setup();
        let owner = make_user(&store, "owner", &[]);
        store.upsert_bag("open", "", None).unwrap();
        store.upsert_bag("closed", "", Some(owner.id)).unwrap();
        let recipe = store
            .upsert_recipe(
                "mixed",
                "",
                None,
                &[("open".to_string(), false), ("closed".to_string(), false)],
                &[],
                false,
                false,
            )
            .unwrap();

        let reader = make_user(&store, "reader", &[]);
        assert!(!check_recipe_permission(&store, &reader, &recipe, Permission::Read).unwrap());
        // WRITE only consults position 0, which is open
        assert!(check_recipe_permission(&store, &reader, &recipe, Permission::Write).unwrap());
    }

    #[test]
    fn test_require_order_not_found_before_forbidden() {
        let store = setup();
        let anon = User::anonymous();
        let err = require_bag_read(&store, &anon, "missing").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }
}
