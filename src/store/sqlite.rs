use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use uuid::Uuid;

use super::schema::SCHEMA;
use super::{BagRecipeLink, Store, SyncOptions};
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_permission(s: &str) -> Result<Permission> {
    Permission::parse(s).ok_or_else(|| Error::InvalidPermission(s.to_string()))
}

fn row_to_bag(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bag> {
    Ok(Bag {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner_id: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn row_to_recipe(row: &rusqlite::Row<'_>) -> rusqlite::Result<Recipe> {
    let plugin_names: String = row.get(4)?;
    Ok(Recipe {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner_id: row.get(3)?,
        plugin_names: serde_json::from_str(&plugin_names).unwrap_or_default(),
        skip_required_plugins: row.get(5)?,
        skip_core: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

const BAG_COLUMNS: &str = "bag_id, bag_name, description, owner_id, created_at";
const RECIPE_COLUMNS: &str = "recipe_id, recipe_name, description, owner_id, plugin_names, \
     skip_required_plugins, skip_core, created_at";

impl SqliteStore {
    fn load_user(&self, conn: &Connection, id: i64) -> Result<Option<User>> {
        let user = conn
            .query_row(
                "SELECT user_id, username, email, created_at FROM users WHERE user_id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        created_at: parse_datetime(&row.get::<_, String>(3)?),
                        role_ids: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut user) = user else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT role_id FROM user_roles WHERE user_id = ?1 ORDER BY role_id")?;
        let roles = stmt.query_map(params![id], |row| row.get(0))?;
        user.role_ids = roles.collect::<std::result::Result<Vec<i64>, _>>()?;

        Ok(Some(user))
    }

    fn fields_for_revision(
        &self,
        conn: &Connection,
        revision_id: i64,
        title: &str,
    ) -> Result<HashMap<String, String>> {
        let mut stmt =
            conn.prepare("SELECT field_name, field_value FROM fields WHERE revision_id = ?1")?;
        let rows = stmt.query_map(params![revision_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut fields = rows.collect::<std::result::Result<HashMap<_, _>, _>>()?;
        // title is stored as a column but always materialized as a field on read
        fields.insert("title".to_string(), title.to_string());
        Ok(fields)
    }

    fn insert_revision(
        tx: &Transaction<'_>,
        bag_id: i64,
        title: &str,
        is_deleted: bool,
        attachment_hash: Option<&str>,
    ) -> Result<i64> {
        // Replace-then-insert keeps exactly one row per (bag, title); the
        // fresh AUTOINCREMENT rowid is the new revision id.
        tx.execute(
            "DELETE FROM tiddlers WHERE bag_id = ?1 AND title = ?2",
            params![bag_id, title],
        )?;
        tx.execute(
            "INSERT INTO tiddlers (bag_id, title, is_deleted, attachment_hash)
             VALUES (?1, ?2, ?3, ?4)",
            params![bag_id, title, is_deleted, attachment_hash],
        )?;
        Ok(tx.last_insert_rowid())
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA)?;
        for role in RESERVED_ROLES {
            conn.execute(
                "INSERT OR IGNORE INTO roles (role_name, description) VALUES (?1, ?2)",
                params![role, format!("Built-in {role} role")],
            )?;
        }
        Ok(())
    }

    // User operations

    fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<User> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (username, email, password_hash) VALUES (?1, ?2, ?3)",
            params![username, email, password_hash],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::AlreadyExists
            }
            other => Error::from(other),
        })?;
        let id = conn.last_insert_rowid();
        self.load_user(&conn, id)?.ok_or(Error::NotFound)
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn();
        self.load_user(&conn, id)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn();
        let id: Option<i64> = conn
            .query_row(
                "SELECT user_id FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => self.load_user(&conn, id),
            None => Ok(None),
        }
    }

    fn get_user_password_hash(&self, id: i64) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT password_hash FROM users WHERE user_id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn();
        let ids: Vec<i64> = {
            let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY username")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = self.load_user(&conn, id)? {
                users.push(user);
            }
        }
        Ok(users)
    }

    fn update_user(&self, id: i64, username: &str, email: Option<&str>) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET username = ?1, email = ?2 WHERE user_id = ?3",
            params![username, email, id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn set_user_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET password_hash = ?1 WHERE user_id = ?2",
            params![password_hash, id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_user(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM users WHERE user_id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn set_user_roles(&self, user_id: i64, role_ids: &[i64]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM user_roles WHERE user_id = ?1", params![user_id])?;
        for role_id in role_ids {
            tx.execute(
                "INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
                params![user_id, role_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // Role operations

    fn create_role(&self, name: &str, description: Option<&str>) -> Result<Role> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO roles (role_name, description) VALUES (?1, ?2)",
            params![name, description],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::AlreadyExists
            }
            other => Error::from(other),
        })?;
        Ok(Role {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            description: description.map(str::to_string),
        })
    }

    fn get_role(&self, id: i64) -> Result<Option<Role>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT role_id, role_name, description FROM roles WHERE role_id = ?1",
            params![id],
            |row| {
                Ok(Role {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT role_id, role_name, description FROM roles WHERE role_name = ?1",
            params![name],
            |row| {
                Ok(Role {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_roles(&self) -> Result<Vec<Role>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT role_id, role_name, description FROM roles ORDER BY role_name")?;
        let rows = stmt.query_map([], |row| {
            Ok(Role {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn rename_role(&self, id: i64, name: &str, description: Option<&str>) -> Result<()> {
        let current = self.get_role(id)?.ok_or(Error::NotFound)?;
        if RESERVED_ROLES.contains(&current.name.as_str()) {
            return Err(Error::Conflict(format!(
                "role '{}' is reserved and cannot be renamed",
                current.name
            )));
        }
        if RESERVED_ROLES.contains(&name) {
            return Err(Error::Conflict(format!("role name '{name}' is reserved")));
        }
        self.conn().execute(
            "UPDATE roles SET role_name = ?1, description = ?2 WHERE role_id = ?3",
            params![name, description, id],
        )?;
        Ok(())
    }

    fn delete_role(&self, id: i64) -> Result<bool> {
        let Some(current) = self.get_role(id)? else {
            return Ok(false);
        };
        if RESERVED_ROLES.contains(&current.name.as_str()) {
            return Err(Error::Conflict(format!(
                "role '{}' is reserved and cannot be deleted",
                current.name
            )));
        }
        let rows = self
            .conn()
            .execute("DELETE FROM roles WHERE role_id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Session operations

    fn create_session(&self, user_id: i64) -> Result<Session> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.conn().execute(
            "INSERT INTO sessions (session_id, user_id, created_at, last_accessed_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![id, user_id, format_datetime(&now)],
        )?;
        Ok(Session {
            id,
            user_id,
            created_at: now,
            last_accessed_at: now,
        })
    }

    fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        let session = conn
            .query_row(
                "SELECT session_id, user_id, created_at, last_accessed_at
                 FROM sessions WHERE session_id = ?1",
                params![id],
                |row| {
                    Ok(Session {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        created_at: parse_datetime(&row.get::<_, String>(2)?),
                        last_accessed_at: parse_datetime(&row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()?;

        if session.is_some() {
            conn.execute(
                "UPDATE sessions SET last_accessed_at = ?1 WHERE session_id = ?2",
                params![format_datetime(&Utc::now()), id],
            )?;
        }
        Ok(session)
    }

    fn delete_session(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM sessions WHERE session_id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Bag operations

    fn upsert_bag(&self, name: &str, description: &str, owner_id: Option<i64>) -> Result<Bag> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO bags (bag_name, description, owner_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(bag_name) DO UPDATE SET description = excluded.description",
            params![name, description, owner_id],
        )?;
        conn.query_row(
            &format!("SELECT {BAG_COLUMNS} FROM bags WHERE bag_name = ?1"),
            params![name],
            row_to_bag,
        )
        .map_err(Error::from)
    }

    fn get_bag(&self, id: i64) -> Result<Option<Bag>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {BAG_COLUMNS} FROM bags WHERE bag_id = ?1"),
            params![id],
            row_to_bag,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_bag_by_name(&self, name: &str) -> Result<Option<Bag>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {BAG_COLUMNS} FROM bags WHERE bag_name = ?1"),
            params![name],
            row_to_bag,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_bags(&self) -> Result<Vec<Bag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {BAG_COLUMNS} FROM bags ORDER BY bag_name"))?;
        let rows = stmt.query_map([], row_to_bag)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_bag(&self, id: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let tiddler_count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM tiddlers WHERE bag_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let referencing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM recipe_bags WHERE bag_id = ?1",
            params![id],
            |row| row.get(0),
        )?;

        if referencing > 0 && tiddler_count > 0 {
            return Err(Error::Conflict(
                "bag is referenced by a recipe and still contains tiddlers".to_string(),
            ));
        }
        if referencing > 0 {
            // An empty bag may leave its recipes, but never leave one empty.
            let would_empty: i64 = tx.query_row(
                "SELECT COUNT(*) FROM recipe_bags rb WHERE rb.bag_id = ?1
                 AND (SELECT COUNT(*) FROM recipe_bags WHERE recipe_id = rb.recipe_id) = 1",
                params![id],
                |row| row.get(0),
            )?;
            if would_empty > 0 {
                return Err(Error::Conflict(
                    "bag is the only bag of a recipe".to_string(),
                ));
            }
            tx.execute("DELETE FROM recipe_bags WHERE bag_id = ?1", params![id])?;
        }

        let rows = tx.execute("DELETE FROM bags WHERE bag_id = ?1", params![id])?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        tx.commit()?;
        Ok(())
    }

    fn set_bag_acl(&self, bag_id: i64, entries: &[AclEntry]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM bag_acl WHERE bag_id = ?1", params![bag_id])?;
        for entry in entries {
            tx.execute(
                "INSERT OR IGNORE INTO bag_acl (bag_id, role_id, permission) VALUES (?1, ?2, ?3)",
                params![bag_id, entry.role_id, entry.permission.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn bag_acl(&self, bag_id: i64) -> Result<Vec<AclEntry>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT role_id, permission FROM bag_acl WHERE bag_id = ?1")?;
        let rows = stmt.query_map(params![bag_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let raw = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(role_id, perm)| {
                Ok(AclEntry {
                    role_id,
                    permission: parse_permission(&perm)?,
                })
            })
            .collect()
    }

    fn bag_recipe_links(&self, bag_id: i64) -> Result<Vec<BagRecipeLink>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT recipe_id, position, with_acl FROM recipe_bags WHERE bag_id = ?1",
        )?;
        let rows = stmt.query_map(params![bag_id], |row| {
            Ok(BagRecipeLink {
                recipe_id: row.get(0)?,
                position: row.get(1)?,
                with_acl: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Recipe operations

    fn upsert_recipe(
        &self,
        name: &str,
        description: &str,
        owner_id: Option<i64>,
        bags: &[(String, bool)],
        plugin_names: &[String],
        skip_required_plugins: bool,
        skip_core: bool,
    ) -> Result<Recipe> {
        if bags.is_empty() {
            return Err(Error::Conflict(
                "a recipe must reference at least one bag".to_string(),
            ));
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut bag_ids = Vec::with_capacity(bags.len());
        for (bag_name, with_acl) in bags {
            let bag_id: Option<i64> = tx
                .query_row(
                    "SELECT bag_id FROM bags WHERE bag_name = ?1",
                    params![bag_name],
                    |row| row.get(0),
                )
                .optional()?;
            let bag_id =
                bag_id.ok_or_else(|| Error::BadRequest(format!("unknown bag '{bag_name}'")))?;
            bag_ids.push((bag_id, *with_acl));
        }

        let plugins = serde_json::to_string(plugin_names)
            .map_err(|e| Error::BadRequest(format!("invalid plugin list: {e}")))?;
        tx.execute(
            "INSERT INTO recipes
                 (recipe_name, description, owner_id, plugin_names, skip_required_plugins, skip_core)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(recipe_name) DO UPDATE SET
                 description = excluded.description,
                 plugin_names = excluded.plugin_names,
                 skip_required_plugins = excluded.skip_required_plugins,
                 skip_core = excluded.skip_core",
            params![name, description, owner_id, plugins, skip_required_plugins, skip_core],
        )?;
        let recipe_id: i64 = tx.query_row(
            "SELECT recipe_id FROM recipes WHERE recipe_name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        // Membership replacement is delete-all-then-recreate
        tx.execute(
            "DELETE FROM recipe_bags WHERE recipe_id = ?1",
            params![recipe_id],
        )?;
        for (position, (bag_id, with_acl)) in bag_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO recipe_bags (recipe_id, bag_id, position, with_acl)
                 VALUES (?1, ?2, ?3, ?4)",
                params![recipe_id, bag_id, position as i64, with_acl],
            )?;
        }

        let recipe = tx.query_row(
            &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE recipe_id = ?1"),
            params![recipe_id],
            row_to_recipe,
        )?;
        tx.commit()?;
        Ok(recipe)
    }

    fn get_recipe(&self, id: i64) -> Result<Option<Recipe>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE recipe_id = ?1"),
            params![id],
            row_to_recipe,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_recipe_by_name(&self, name: &str) -> Result<Option<Recipe>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE recipe_name = ?1"),
            params![name],
            row_to_recipe,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {RECIPE_COLUMNS} FROM recipes ORDER BY recipe_name"))?;
        let rows = stmt.query_map([], row_to_recipe)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_recipe(&self, id: i64) -> Result<bool> {
        // Recipes are views: deleting one never touches its bags or tiddlers.
        let rows = self
            .conn()
            .execute("DELETE FROM recipes WHERE recipe_id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn recipe_bags(&self, recipe_id: i64) -> Result<Vec<RecipeBag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT rb.bag_id, b.bag_name, rb.position, rb.with_acl
             FROM recipe_bags rb JOIN bags b ON b.bag_id = rb.bag_id
             WHERE rb.recipe_id = ?1 ORDER BY rb.position",
        )?;
        let rows = stmt.query_map(params![recipe_id], |row| {
            Ok(RecipeBag {
                bag_id: row.get(0)?,
                bag_name: row.get(1)?,
                position: row.get(2)?,
                with_acl: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn set_recipe_acl(&self, recipe_id: i64, entries: &[AclEntry]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM recipe_acl WHERE recipe_id = ?1",
            params![recipe_id],
        )?;
        for entry in entries {
            tx.execute(
                "INSERT OR IGNORE INTO recipe_acl (recipe_id, role_id, permission)
                 VALUES (?1, ?2, ?3)",
                params![recipe_id, entry.role_id, entry.permission.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn recipe_acl(&self, recipe_id: i64) -> Result<Vec<AclEntry>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT role_id, permission FROM recipe_acl WHERE recipe_id = ?1")?;
        let rows = stmt.query_map(params![recipe_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let raw = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(role_id, perm)| {
                Ok(AclEntry {
                    role_id,
                    permission: parse_permission(&perm)?,
                })
            })
            .collect()
    }

    // Tiddler operations

    fn save_tiddler(
        &self,
        bag_id: i64,
        fields: &HashMap<String, String>,
        attachment_hash: Option<&str>,
    ) -> Result<i64> {
        let title = fields
            .get("title")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::BadRequest("tiddler must have a title".to_string()))?
            .clone();

        if attachment_hash.is_some() && fields.get("text").is_some_and(|t| !t.is_empty()) {
            return Err(Error::BadRequest(
                "a tiddler revision may carry inline text or an attachment, not both".to_string(),
            ));
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let revision_id = Self::insert_revision(&tx, bag_id, &title, false, attachment_hash)?;
        for (name, value) in fields {
            if name == "title" {
                continue;
            }
            tx.execute(
                "INSERT INTO fields (revision_id, field_name, field_value) VALUES (?1, ?2, ?3)",
                params![revision_id, name, value],
            )?;
        }
        tx.commit()?;
        Ok(revision_id)
    }

    fn delete_tiddler(&self, bag_id: i64, title: &str) -> Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        // Tombstone: no fields, no attachment
        let revision_id = Self::insert_revision(&tx, bag_id, title, true, None)?;
        tx.commit()?;
        Ok(revision_id)
    }

    fn tiddler(&self, bag_id: i64, title: &str) -> Result<Option<TiddlerData>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT revision_id, is_deleted, attachment_hash FROM tiddlers
                 WHERE bag_id = ?1 AND title = ?2
                 ORDER BY revision_id DESC LIMIT 1",
                params![bag_id, title],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((revision_id, is_deleted, attachment_hash)) = row else {
            return Ok(None);
        };

        let fields = if is_deleted {
            HashMap::new()
        } else {
            self.fields_for_revision(&conn, revision_id, title)?
        };

        Ok(Some(TiddlerData {
            title: title.to_string(),
            revision_id,
            is_deleted,
            fields,
            attachment_hash,
        }))
    }

    fn bag_state(&self, bag_id: i64, opts: SyncOptions) -> Result<Vec<TiddlerInfo>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT title, revision_id, is_deleted FROM tiddlers
             WHERE bag_id = ?1 AND revision_id > ?2 AND (is_deleted = 0 OR ?3)
             ORDER BY revision_id",
        )?;
        let since = opts.last_known_revision_id.unwrap_or(0);
        let rows = stmt.query_map(params![bag_id, since, opts.include_deleted], |row| {
            Ok(TiddlerInfo {
                title: row.get(0)?,
                revision_id: row.get(1)?,
                is_deleted: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn read_bag_tiddlers(&self, bag_id: i64, opts: SyncOptions) -> Result<Vec<TiddlerData>> {
        let conn = self.conn();
        let raw = {
            let mut stmt = conn.prepare(
                "SELECT title, revision_id, is_deleted, attachment_hash FROM tiddlers
                 WHERE bag_id = ?1 AND revision_id > ?2 AND (is_deleted = 0 OR ?3)
                 ORDER BY title",
            )?;
            let since = opts.last_known_revision_id.unwrap_or(0);
            let rows = stmt.query_map(params![bag_id, since, opts.include_deleted], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let mut tiddlers = Vec::with_capacity(raw.len());
        for (title, revision_id, is_deleted, attachment_hash) in raw {
            let fields = if is_deleted {
                HashMap::new()
            } else {
                self.fields_for_revision(&conn, revision_id, &title)?
            };
            tiddlers.push(TiddlerData {
                title,
                revision_id,
                is_deleted,
                fields,
                attachment_hash,
            });
        }
        Ok(tiddlers)
    }

    fn empty_bag(&self, bag_id: i64) -> Result<()> {
        // Bulk clear for reimport flows; the only physical removal of history.
        self.conn()
            .execute("DELETE FROM tiddlers WHERE bag_id = ?1", params![bag_id])?;
        Ok(())
    }

    fn max_revision_id(&self) -> Result<i64> {
        let conn = self.conn();
        // The AUTOINCREMENT sequence is the highest revision ever issued, so
        // ETag material stays monotonic even after empty_bag.
        conn.query_row(
            "SELECT COALESCE((SELECT seq FROM sqlite_sequence WHERE name = 'tiddlers'), 0)",
            [],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }

    fn has_admin_user(&self) -> Result<bool> {
        let conn = self.conn();
        conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM user_roles ur
                 JOIN roles r ON r.role_id = ur.role_id
                 WHERE r.role_name = 'ADMIN')",
            [],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }
}
