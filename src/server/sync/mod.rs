//! The synchronization surface: tiddler CRUD under bag and recipe scopes,
//! merged-view and state payloads, SSE change feeds, multipart uploads, and
//! the rendered wiki shell.

mod feed;
mod shell;
mod state;
mod tiddler;
mod upload;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;

use super::AppState;
use super::compress;
use super::response::ApiError;

pub fn sync_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/recipe/{recipe}/tiddlers.json", get(state::tiddlers_json))
        .route("/recipe/{recipe}/bag-states", get(state::bag_states))
        .route("/recipe/{recipe}/all-bags-state", get(state::all_bags_state))
        .route("/recipe/{recipe}/tiddlers", post(upload::recipe_upload))
        .route(
            "/recipe/{recipe}/tiddlers/{title}",
            get(tiddler::recipe_read)
                .put(tiddler::recipe_write)
                .delete(tiddler::recipe_delete),
        )
        .route("/recipe/{recipe}/events", get(feed::recipe_events))
        .route("/bag/{bag}/tiddlers", post(upload::bag_upload))
        .route(
            "/bag/{bag}/tiddlers/{title}",
            get(tiddler::bag_read)
                .put(tiddler::bag_write)
                .delete(tiddler::bag_delete),
        )
        .route("/wiki/{recipe}", get(shell::wiki_page))
        .route("/$cache/{plugin}/plugin.js", get(shell::plugin_bundle))
}

/// Builds a buffered JSON response, gzipping the body when negotiation says
/// it is worth it.
fn buffered_json(request_headers: &HeaderMap, body: Vec<u8>) -> Result<Response, ApiError> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json");

    let body = if compress::negotiate(request_headers, "application/json", None, body.len()) {
        builder = builder.header(header::CONTENT_ENCODING, "gzip");
        compress::gzip_body(&body).map_err(|_| ApiError::internal("Failed to compress response"))?
    } else {
        body
    };

    builder
        .body(Body::from(body))
        .map_err(|_| ApiError::internal("Failed to build response"))
}
