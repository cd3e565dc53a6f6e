pub const SCHEMA: &str = r#"
-- Roles; ADMIN and USER are seeded at initialize and immutable via the API
CREATE TABLE IF NOT EXISTS roles (
    role_id INTEGER PRIMARY KEY AUTOINCREMENT,
    role_name TEXT NOT NULL UNIQUE,
    description TEXT
);

CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT,
    password_hash TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS user_roles (
    user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    role_id INTEGER NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, role_id)
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    created_at TEXT DEFAULT (datetime('now')),
    last_accessed_at TEXT DEFAULT (datetime('now'))
);

-- Bags are the unit of storage and of WRITE access; never nested
CREATE TABLE IF NOT EXISTS bags (
    bag_id INTEGER PRIMARY KEY AUTOINCREMENT,
    bag_name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    owner_id INTEGER REFERENCES users(user_id) ON DELETE SET NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Recipes are views over bags, not storage
CREATE TABLE IF NOT EXISTS recipes (
    recipe_id INTEGER PRIMARY KEY AUTOINCREMENT,
    recipe_name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    owner_id INTEGER REFERENCES users(user_id) ON DELETE SET NULL,
    plugin_names TEXT NOT NULL DEFAULT '[]',  -- JSON array of plugin names
    skip_required_plugins INTEGER NOT NULL DEFAULT 0,
    skip_core INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Ordered bag list of a recipe; position 0 is the writable bag
CREATE TABLE IF NOT EXISTS recipe_bags (
    recipe_id INTEGER NOT NULL REFERENCES recipes(recipe_id) ON DELETE CASCADE,
    bag_id INTEGER NOT NULL REFERENCES bags(bag_id),
    position INTEGER NOT NULL,
    with_acl INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (recipe_id, bag_id),
    UNIQUE (recipe_id, position)
);

-- Tiddler revisions, append-only. AUTOINCREMENT keeps revision ids strictly
-- increasing and never reused across the whole store, which the sync cursors
-- and ETags depend on.
CREATE TABLE IF NOT EXISTS tiddlers (
    revision_id INTEGER PRIMARY KEY AUTOINCREMENT,
    bag_id INTEGER NOT NULL REFERENCES bags(bag_id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    attachment_hash TEXT
);

CREATE TABLE IF NOT EXISTS fields (
    revision_id INTEGER NOT NULL REFERENCES tiddlers(revision_id) ON DELETE CASCADE,
    field_name TEXT NOT NULL,
    field_value TEXT NOT NULL,
    PRIMARY KEY (revision_id, field_name)
);

-- (role, permission) grants attached to one bag or recipe
CREATE TABLE IF NOT EXISTS bag_acl (
    bag_id INTEGER NOT NULL REFERENCES bags(bag_id) ON DELETE CASCADE,
    role_id INTEGER NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
    permission TEXT NOT NULL CHECK (permission IN ('READ', 'WRITE', 'ADMIN')),
    PRIMARY KEY (bag_id, role_id, permission)
);

CREATE TABLE IF NOT EXISTS recipe_acl (
    recipe_id INTEGER NOT NULL REFERENCES recipes(recipe_id) ON DELETE CASCADE,
    role_id INTEGER NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
    permission TEXT NOT NULL CHECK (permission IN ('READ', 'WRITE', 'ADMIN')),
    PRIMARY KEY (recipe_id, role_id, permission)
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_tiddlers_bag_title ON tiddlers(bag_id, title);
CREATE INDEX IF NOT EXISTS idx_tiddlers_bag_revision ON tiddlers(bag_id, revision_id);
CREATE INDEX IF NOT EXISTS idx_fields_revision ON fields(revision_id);
CREATE INDEX IF NOT EXISTS idx_recipe_bags_bag ON recipe_bags(bag_id);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_user_roles_user ON user_roles(user_id);
CREATE INDEX IF NOT EXISTS idx_bag_acl_bag ON bag_acl(bag_id);
CREATE INDEX IF NOT EXISTS idx_recipe_acl_recipe ON recipe_acl(recipe_id);
"#;
