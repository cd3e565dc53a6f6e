//! Single-tiddler reads, writes, and deletes under both scopes.
//!
//! Bag routes address one bag directly. Recipe routes resolve through the
//! overlay for reads and always target the position-0 bag for writes and
//! deletes, even when the title currently resolves from a deeper bag.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use async_compression::tokio::bufread::GzipEncoder;
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::auth::AuthUser;
use crate::server::AppState;
use crate::server::access;
use crate::server::compress;
use crate::server::events::{TiddlerChange, publish};
use crate::server::response::{ApiError, StoreResultExt};
use crate::store::view;
use crate::types::TiddlerData;

pub const MWS_TIDDLER_TYPE: &str = "application/x-mws-tiddler";

/// Splits at the first blank line, LF or CRLF, whichever comes first.
fn split_blank_line(text: &str) -> (&str, &str) {
    let lf = text.find("\n\n");
    let crlf = text.find("\r\n\r\n");
    match (lf, crlf) {
        (Some(l), Some(c)) if c < l => (&text[..c], &text[c + 4..]),
        (Some(l), _) => (&text[..l], &text[l + 2..]),
        (None, Some(c)) => (&text[..c], &text[c + 4..]),
        (None, None) => (text, ""),
    }
}

/// Parses a PUT body into a field map. JSON bodies are a flat string map;
/// `application/x-mws-tiddler` is a JSON header blob, a blank line, then the
/// raw text body.
fn parse_tiddler_body(content_type: &str, body: &[u8]) -> Result<HashMap<String, String>, ApiError> {
    let base = content_type.split(';').next().unwrap_or("").trim();
    match base {
        "application/json" => serde_json::from_slice(body)
            .map_err(|e| ApiError::bad_request(format!("Malformed tiddler JSON: {e}"))),
        MWS_TIDDLER_TYPE => {
            let text = std::str::from_utf8(body)
                .map_err(|_| ApiError::bad_request("Tiddler body is not valid UTF-8"))?;
            let (header, rest) = split_blank_line(text);
            let mut fields: HashMap<String, String> = serde_json::from_str(header)
                .map_err(|e| ApiError::bad_request(format!("Malformed tiddler header: {e}")))?;
            fields.insert("text".to_string(), rest.to_string());
            Ok(fields)
        }
        other => Err(ApiError::bad_request(format!(
            "Unsupported content type: {other}"
        ))),
    }
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Revision headers every tiddler response carries.
fn revision_builder(bag_name: &str, revision_id: i64) -> axum::http::response::Builder {
    Response::builder()
        .header(header::ETAG, format!("\"{revision_id}\""))
        .header("x-revision-number", revision_id.to_string())
        .header("x-bag-name", bag_name)
}

fn build(builder: axum::http::response::Builder, body: Body) -> Result<Response, ApiError> {
    builder
        .body(body)
        .map_err(|_| ApiError::internal("Failed to build response"))
}

async fn tiddler_response(
    state: &AppState,
    request_headers: &HeaderMap,
    bag_name: &str,
    tiddler: TiddlerData,
) -> Result<Response, ApiError> {
    if let Some(hash) = &tiddler.attachment_hash {
        let path = state.config.files_dir().join(hash);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|_| ApiError::not_found("Attachment blob missing"))?;
        let media_type = tiddler
            .fields
            .get("type")
            .cloned()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let size = file
            .metadata()
            .await
            .map(|m| m.len() as usize)
            .unwrap_or(0);
        let mut builder = revision_builder(bag_name, tiddler.revision_id)
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, media_type.clone());

        // compressible attachments are gzipped as they stream off disk
        let body = if compress::negotiate(request_headers, &media_type, None, size) {
            builder = builder.header(header::CONTENT_ENCODING, "gzip");
            let encoder = GzipEncoder::new(tokio::io::BufReader::new(file));
            Body::from_stream(ReaderStream::new(encoder))
        } else {
            Body::from_stream(ReaderStream::new(file))
        };
        return build(builder, body);
    }

    let body = serde_json::to_vec(&tiddler.fields)
        .map_err(|_| ApiError::internal("Failed to serialize tiddler"))?;
    build(
        revision_builder(bag_name, tiddler.revision_id)
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json"),
        Body::from(body),
    )
}

fn saved_response(state: &AppState, bag_name: &str, title: &str, revision_id: i64, is_deleted: bool) -> Result<Response, ApiError> {
    publish(
        &state.changes,
        TiddlerChange {
            bag_name: bag_name.to_string(),
            title: title.to_string(),
            revision_id,
            is_deleted,
        },
    );

    let body = json!({
        "data": { "bag_name": bag_name, "revision_id": revision_id },
        "error": null,
    });
    build(
        revision_builder(bag_name, revision_id)
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json"),
        Body::from(body.to_string()),
    )
}

fn save(
    state: &AppState,
    bag_id: i64,
    bag_name: &str,
    title: String,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, ApiError> {
    let mut fields = parse_tiddler_body(content_type(headers), body)?;
    // the URL path names the tiddler; a differing body title is ignored
    fields.insert("title".to_string(), title.clone());

    let revision_id = state
        .store
        .save_tiddler(bag_id, &fields, None)
        .api_err("Failed to save tiddler")?;
    saved_response(state, bag_name, &title, revision_id, false)
}

fn remove(
    state: &AppState,
    bag_id: i64,
    bag_name: &str,
    title: &str,
) -> Result<Response, ApiError> {
    let current = state
        .store
        .tiddler(bag_id, title)
        .api_err("Failed to look up tiddler")?;
    match current {
        Some(t) if !t.is_deleted => {}
        _ => return Err(ApiError::not_found("Tiddler not found")),
    }

    let revision_id = state
        .store
        .delete_tiddler(bag_id, title)
        .api_err("Failed to delete tiddler")?;
    saved_response(state, bag_name, title, revision_id, true)
}

pub async fn bag_read(
    State(state): State<Arc<AppState>>,
    Path((bag_name, title)): Path<(String, String)>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let grant = access::require_bag_read(state.store.as_ref(), &user, &bag_name)?;
    let tiddler = state
        .store
        .tiddler(grant.bag.id, &title)
        .api_err("Failed to look up tiddler")?;
    match tiddler {
        Some(t) if !t.is_deleted => tiddler_response(&state, &headers, &grant.bag.name, t).await,
        _ => Err(ApiError::not_found("Tiddler not found")),
    }
}

pub async fn bag_write(
    State(state): State<Arc<AppState>>,
    Path((bag_name, title)): Path<(String, String)>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let grant = access::require_bag_write(state.store.as_ref(), &user, &bag_name)?;
    save(&state, grant.bag.id, &grant.bag.name, title, &headers, &body)
}

pub async fn bag_delete(
    State(state): State<Arc<AppState>>,
    Path((bag_name, title)): Path<(String, String)>,
    AuthUser(user): AuthUser,
) -> Result<Response, ApiError> {
    let grant = access::require_bag_write(state.store.as_ref(), &user, &bag_name)?;
    remove(&state, grant.bag.id, &grant.bag.name, &title)
}

pub async fn recipe_read(
    State(state): State<Arc<AppState>>,
    Path((recipe_name, title)): Path<(String, String)>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let grant = access::require_recipe_read(state.store.as_ref(), &user, &recipe_name)?;
    let resolved = view::recipe_tiddler(state.store.as_ref(), &grant.bags, &title)
        .api_err("Failed to resolve tiddler")?;
    match resolved {
        Some(r) => tiddler_response(&state, &headers, &r.bag_name, r.tiddler).await,
        None => Err(ApiError::not_found("Tiddler not found")),
    }
}

pub async fn recipe_write(
    State(state): State<Arc<AppState>>,
    Path((recipe_name, title)): Path<(String, String)>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let grant = access::require_recipe_write(state.store.as_ref(), &user, &recipe_name)?;
    save(
        &state,
        grant.writable.bag_id,
        &grant.writable.bag_name,
        title,
        &headers,
        &body,
    )
}

pub async fn recipe_delete(
    State(state): State<Arc<AppState>>,
    Path((recipe_name, title)): Path<(String, String)>,
    AuthUser(user): AuthUser,
) -> Result<Response, ApiError> {
    let grant = access::require_recipe_write(state.store.as_ref(), &user, &recipe_name)?;
    remove(&state, grant.writable.bag_id, &grant.writable.bag_name, &title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_body() {
        let fields =
            parse_tiddler_body("application/json", br#"{"title":"A","text":"hello"}"#).unwrap();
        assert_eq!(fields["text"], "hello");
    }

    #[test]
    fn test_parse_mws_body_splits_on_blank_line() {
        let body = "{\"title\":\"A\",\"tags\":\"x\"}\n\nline one\nline two";
        let fields = parse_tiddler_body(MWS_TIDDLER_TYPE, body.as_bytes()).unwrap();
        assert_eq!(fields["tags"], "x");
        assert_eq!(fields["text"], "line one\nline two");
    }

    #[test]
    fn test_parse_mws_body_with_crlf_delimiter() {
        let body = "{\"title\":\"A\",\"tags\":\"x\"}\r\n\r\nline one\r\nline two";
        let fields = parse_tiddler_body(MWS_TIDDLER_TYPE, body.as_bytes()).unwrap();
        assert_eq!(fields["tags"], "x");
        assert_eq!(fields["text"], "line one\r\nline two");
    }

    #[test]
    fn test_parse_mws_body_without_text_section() {
        let fields = parse_tiddler_body(MWS_TIDDLER_TYPE, b"{\"title\":\"A\"}").unwrap();
        assert_eq!(fields["text"], "");
    }

    #[test]
    fn test_parse_rejects_unknown_content_type() {
        assert!(parse_tiddler_body("text/plain", b"hi").is_err());
    }
}
