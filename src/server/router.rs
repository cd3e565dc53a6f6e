use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::events::{ChangeSender, change_channel};
use super::wiki::WikiAssets;
use super::{admin_router, login_router, sync_router};
use crate::auth::PasswordHasherConfig;
use crate::config::ServerConfig;
use crate::server::access;
use crate::store::Store;
use crate::types::User;

/// An in-flight login exchange: step 1 issued the nonce, step 2 consumes it.
pub struct PendingLogin {
    pub user_id: i64,
    pub nonce: String,
    pub started_at: Instant,
}

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: ServerConfig,
    /// Template bytes and plugin bundles, loaded once at startup and
    /// read-only afterwards.
    pub wiki: WikiAssets,
    pub changes: ChangeSender,
    pub hasher: PasswordHasherConfig,
    pub login_exchanges: Mutex<HashMap<String, PendingLogin>>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: ServerConfig, wiki: WikiAssets) -> Self {
        Self {
            store,
            config,
            wiki,
            changes: change_channel(),
            hasher: PasswordHasherConfig::new(),
            login_exchanges: Mutex::new(HashMap::new()),
        }
    }

    pub fn user_is_admin(&self, user: &User) -> bool {
        access::user_is_site_admin(self.store.as_ref(), user).unwrap_or_else(|e| {
            tracing::error!("admin role lookup failed: {e}");
            false
        })
    }
}

async fn health() -> &'static str {
    "OK"
}

/// Paths the route tree does not cover are a client error, not a missing
/// resource: the router cannot assert existence of anything it never routed
/// to.
async fn unrouted() -> (StatusCode, &'static str) {
    (StatusCode::BAD_REQUEST, "Unrecognized path")
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/admin", admin_router(state.clone()))
        .merge(login_router())
        .merge(sync_router())
        .fallback(unrouted)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
