//! Merged-view and per-bag state payloads with ETag short-circuiting.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream;
use serde_json::Value;

use crate::auth::AuthUser;
use crate::server::AppState;
use crate::server::access;
use crate::server::compress;
use crate::server::dto::SyncParams;
use crate::server::response::{ApiError, StoreResultExt};
use crate::store::SyncOptions;
use crate::store::view::{self, ResolvedTiddler};

use super::buffered_json;

/// Target size of one gzip member in the streamed variant. Small enough to
/// flush early, large enough that the members still compress.
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

fn list_item(resolved: &ResolvedTiddler) -> Value {
    let mut obj = serde_json::Map::new();
    for (k, v) in &resolved.tiddler.fields {
        obj.insert(k.clone(), Value::String(v.clone()));
    }
    // tombstones carry no fields; the title and marker still identify them
    obj.insert(
        "title".to_string(),
        Value::String(resolved.tiddler.title.clone()),
    );
    if resolved.tiddler.is_deleted {
        obj.insert("is_deleted".to_string(), Value::Bool(true));
    }
    obj.insert("bag".to_string(), Value::String(resolved.bag_name.clone()));
    obj.insert(
        "revision".to_string(),
        Value::String(resolved.tiddler.revision_id.to_string()),
    );
    Value::Object(obj)
}

/// Streams the tiddler array as a concatenation of independently-valid gzip
/// members. The transfer framing stays identity; clients ask for this shape
/// explicitly with `gzip_stream=yes` and feed a multi-member decoder.
fn gzip_stream_response(items: &[Value]) -> Result<Response, ApiError> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::from("[");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            current.push(',');
        }
        current.push('\n');
        let line = serde_json::to_string(item)
            .map_err(|_| ApiError::internal("Failed to serialize tiddler list"))?;
        current.push_str(&line);
        if current.len() >= STREAM_CHUNK_BYTES {
            parts.push(std::mem::take(&mut current));
        }
    }
    current.push_str("\n]");
    parts.push(current);

    let mut members: Vec<Bytes> = Vec::with_capacity(parts.len());
    for part in &parts {
        members.push(
            compress::gzip_member(part.as_bytes())
                .map_err(|_| ApiError::internal("Failed to compress stream member"))?,
        );
    }

    let body = Body::from_stream(stream::iter(
        members.into_iter().map(Ok::<_, std::convert::Infallible>),
    ));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .map_err(|_| ApiError::internal("Failed to build response"))
}

pub async fn tiddlers_json(
    State(state): State<Arc<AppState>>,
    Path(recipe_name): Path<String>,
    Query(params): Query<SyncParams>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let grant = access::require_recipe_read(state.store.as_ref(), &user, &recipe_name)?;
    let opts = SyncOptions {
        last_known_revision_id: params.last_known_revision_id,
        include_deleted: params.include_deleted(),
    };
    let resolved = view::resolve_recipe_view(state.store.as_ref(), &grant.bags, opts)
        .api_err("Failed to resolve recipe view")?;
    let items: Vec<Value> = resolved.iter().map(list_item).collect();

    if params.gzip_stream() && compress::accepts_gzip(&headers) {
        return gzip_stream_response(&items);
    }

    let body = serde_json::to_vec(&items)
        .map_err(|_| ApiError::internal("Failed to serialize tiddler list"))?;
    buffered_json(&headers, body)
}

fn if_none_match_hits(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|candidate| candidate.trim() == etag))
}

fn states_response(
    state: &AppState,
    grant: &access::RecipeReadGrant,
    headers: &HeaderMap,
    opts: SyncOptions,
) -> Result<Response, ApiError> {
    let states = view::recipe_bag_states(state.store.as_ref(), &grant.bags, opts)
        .api_err("Failed to read bag states")?;
    let etag = format!("\"{}\"", view::max_observed_revision(&states));

    if if_none_match_hits(headers, &etag) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, etag)
            .body(Body::empty())
            .map_err(|_| ApiError::internal("Failed to build response"));
    }

    let body = serde_json::to_vec(&states)
        .map_err(|_| ApiError::internal("Failed to serialize bag states"))?;
    let mut response = buffered_json(headers, body)?;
    if let Ok(value) = etag.parse() {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// Incremental state: rows newer than the client's cursor, per bag.
pub async fn bag_states(
    State(state): State<Arc<AppState>>,
    Path(recipe_name): Path<String>,
    Query(params): Query<SyncParams>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let grant = access::require_recipe_read(state.store.as_ref(), &user, &recipe_name)?;
    let opts = SyncOptions {
        last_known_revision_id: params.last_known_revision_id,
        include_deleted: true,
    };
    states_response(&state, &grant, &headers, opts)
}

/// Full state: every current row of every member bag.
pub async fn all_bags_state(
    State(state): State<Arc<AppState>>,
    Path(recipe_name): Path<String>,
    Query(params): Query<SyncParams>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let grant = access::require_recipe_read(state.store.as_ref(), &user, &recipe_name)?;
    let opts = SyncOptions {
        last_known_revision_id: None,
        include_deleted: params.include_deleted(),
    };
    states_response(&state, &grant, &headers, opts)
}
