//! # Satchel
//!
//! A multi-tenant tiddler synchronization server, usable both as a
//! standalone binary and as a library.
//!
//! Content lives in named revisioned collections ("bags") which compose
//! into ordered read/write views ("recipes"). Clients pull a recipe's
//! merged tiddler set, push individual revisions, and follow changes
//! through polling cursors or Server-Sent Events.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use satchel::config::ServerConfig;
//! use satchel::server::{AppState, create_router};
//! use satchel::server::wiki::WikiAssets;
//! use satchel::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::default();
//! let store = SqliteStore::new(&config.db_path()).unwrap();
//! store.initialize().unwrap();
//!
//! let wiki = WikiAssets::load(&config.plugins_dir()).unwrap();
//! let state = Arc::new(AppState::new(Arc::new(store), config, wiki));
//! let router = create_router(state);
//! // Serve with axum...
//! ```

pub mod archive;
pub mod auth;
pub mod config;
pub mod error;
pub mod server;
pub mod store;
pub mod types;
