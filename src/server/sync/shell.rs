//! The rendered wiki shell and the content-hashed plugin cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream;
use serde_json::json;

use crate::auth::AuthUser;
use crate::server::AppState;
use crate::server::access;
use crate::server::compress;
use crate::server::dto::WikiParams;
use crate::server::response::{ApiError, StoreResultExt};
use crate::server::wiki::escape_script_json;
use crate::store::SyncOptions;
use crate::store::view;

/// Synthetic tiddlers the shell embeds so the client can resume syncing:
/// the per-title bag/revision map and the revision high-water mark.
const REVISIONS_TITLE: &str = "$:/state/satchel/revisions";
const LAST_REVISION_TITLE: &str = "$:/state/satchel/last-revision";

fn store_line(value: &serde_json::Value) -> Result<String, ApiError> {
    serde_json::to_string(value)
        .map(|s| escape_script_json(&s))
        .map_err(|_| ApiError::internal("Failed to serialize store area"))
}

pub async fn wiki_page(
    State(state): State<Arc<AppState>>,
    Path(recipe_name): Path<String>,
    Query(params): Query<WikiParams>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let grant = access::require_recipe_read(state.store.as_ref(), &user, &recipe_name)?;
    let inline = params.inline_plugins();
    let plugin_names = state.wiki.select_plugins(
        &grant.recipe.plugin_names,
        grant.recipe.skip_required_plugins,
        grant.recipe.skip_core,
    );

    let states = view::recipe_bag_states(
        state.store.as_ref(),
        &grant.bags,
        SyncOptions {
            last_known_revision_id: None,
            include_deleted: true,
        },
    )
    .api_err("Failed to read bag states")?;
    let max_revision = view::max_observed_revision(&states);

    let bag_names: Vec<String> = grant.bags.iter().map(|b| b.bag_name.clone()).collect();
    let etag = state
        .wiki
        .wiki_etag(&bag_names, &plugin_names, max_revision, inline);

    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    if if_none_match.is_some_and(|v| v.split(',').any(|c| c.trim() == etag)) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, etag)
            .body(Body::empty())
            .map_err(|_| ApiError::internal("Failed to build response"));
    }

    // head, plugin script tags, store area one object per line, tail
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut preload: Vec<String> = Vec::new();
    chunks.push(state.wiki.head.clone());
    for name in &plugin_names {
        match state.wiki.plugins.get(name) {
            Some(plugin) if inline => {
                let js = String::from_utf8_lossy(&plugin.raw);
                chunks.push(Bytes::from(format!(
                    "<script>{}</script>\n",
                    escape_script_json(&js)
                )));
            }
            Some(_) => {
                preload.push(format!("</$cache/{name}/plugin.js>; rel=preload; as=script"));
                chunks.push(Bytes::from(format!(
                    "<script src=\"/$cache/{name}/plugin.js\"></script>\n"
                )));
            }
            None => tracing::warn!("recipe {recipe_name} references unknown plugin {name}"),
        }
    }
    chunks.push(state.wiki.mid.clone());

    let resolved = view::resolve_recipe_view(
        state.store.as_ref(),
        &grant.bags,
        SyncOptions::default(),
    )
    .api_err("Failed to resolve recipe view")?;

    let mut revisions: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    let mut lines: Vec<String> = Vec::with_capacity(resolved.len() + 2);
    for r in &resolved {
        lines.push(store_line(&json!(r.tiddler.fields))?);
        revisions.insert(
            r.tiddler.title.clone(),
            json!({ "bag_name": r.bag_name, "revision_id": r.tiddler.revision_id }),
        );
    }
    let revisions_text = serde_json::to_string(&revisions)
        .map_err(|_| ApiError::internal("Failed to serialize store area"))?;
    lines.push(store_line(&json!({
        "title": REVISIONS_TITLE,
        "type": "application/json",
        "text": revisions_text,
    }))?);
    lines.push(store_line(&json!({
        "title": LAST_REVISION_TITLE,
        "text": max_revision.to_string(),
    }))?);
    chunks.push(Bytes::from(lines.join(",\n")));
    chunks.push(state.wiki.tail.clone());

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::ETAG, etag);
    // preload pass so the browser fetches bundles before parsing reaches them
    for value in &preload {
        builder = builder.header(header::LINK, value.as_str());
    }

    // each chunk compresses to a complete gzip member; the concatenation is
    // a valid multi-member gzip stream
    if compress::accepts_gzip(&headers) {
        builder = builder.header(header::CONTENT_ENCODING, "gzip");
        let mut members = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            members.push(
                compress::gzip_member(chunk)
                    .map_err(|_| ApiError::internal("Failed to compress wiki shell"))?,
            );
        }
        chunks = members;
    }

    let body = Body::from_stream(stream::iter(
        chunks.into_iter().map(Ok::<_, std::convert::Infallible>),
    ));
    builder
        .body(body)
        .map_err(|_| ApiError::internal("Failed to build response"))
}

pub async fn plugin_bundle(
    State(state): State<Arc<AppState>>,
    Path(plugin_name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let Some(plugin) = state.wiki.plugins.get(&plugin_name) else {
        return Err(ApiError::not_found("Plugin not found"));
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/javascript")
        .header(header::CACHE_CONTROL, "public, max-age=31536000, immutable")
        .header(header::ETAG, format!("\"{}\"", plugin.hash));

    let body = if compress::accepts_gzip(&headers) {
        builder = builder.header(header::CONTENT_ENCODING, "gzip");
        plugin.gz.clone()
    } else {
        plugin.raw.clone()
    };

    builder
        .body(Body::from(body))
        .map_err(|_| ApiError::internal("Failed to build response"))
}
