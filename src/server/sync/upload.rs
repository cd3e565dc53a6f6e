//! Multipart tiddler uploads.
//!
//! An upload carries `tiddler-field-*` text parts plus an optional
//! `file-to-upload` binary part. The binary part is hashed while it streams
//! and spilled to a per-upload staging directory once it outgrows the memory
//! threshold; the finished blob moves into the content-addressed files
//! directory. The staging directory is removed when the handler returns,
//! successful or not.

use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::response::Response;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::server::AppState;
use crate::server::access;
use crate::server::events::{TiddlerChange, publish};
use crate::server::response::{ApiError, StoreResultExt};

/// File parts up to this size stay in memory; larger ones spill to disk.
const SPOOL_THRESHOLD: usize = 1 << 20;

const FILE_PART: &str = "file-to-upload";
const FIELD_PART_PREFIX: &str = "tiddler-field-";

/// Removes the per-upload staging directory on drop, so early returns and
/// multipart errors cannot leave partial spools behind.
struct StagingGuard {
    dir: PathBuf,
}

impl StagingGuard {
    fn create(staging_root: &FsPath) -> Result<Self, ApiError> {
        let dir = staging_root.join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir)
            .map_err(|_| ApiError::internal("Failed to create staging directory"))?;
        Ok(Self { dir })
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            tracing::warn!("failed to clear staging dir {}: {e}", self.dir.display());
        }
    }
}

struct UploadedTiddler {
    fields: HashMap<String, String>,
    attachment_hash: Option<String>,
}

async fn receive_file_part(
    field: &mut axum::extract::multipart::Field<'_>,
    guard: &StagingGuard,
    files_dir: &FsPath,
) -> Result<String, ApiError> {
    let mut hasher = Sha256::new();
    let mut buffer: Vec<u8> = Vec::new();
    let mut spooled: Option<tokio::fs::File> = None;
    let spool_path = guard.dir.join("upload");

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        hasher.update(&chunk);
        if let Some(file) = spooled.as_mut() {
            file.write_all(&chunk)
                .await
                .map_err(|_| ApiError::internal("Failed to spool upload"))?;
        } else {
            buffer.extend_from_slice(&chunk);
            if buffer.len() >= SPOOL_THRESHOLD {
                let mut file = tokio::fs::File::create(&spool_path)
                    .await
                    .map_err(|_| ApiError::internal("Failed to spool upload"))?;
                file.write_all(&buffer)
                    .await
                    .map_err(|_| ApiError::internal("Failed to spool upload"))?;
                buffer.clear();
                spooled = Some(file);
            }
        }
    }

    let hash = hex::encode(hasher.finalize());
    let dest = files_dir.join(&hash);
    if !dest.exists() {
        tokio::fs::create_dir_all(files_dir)
            .await
            .map_err(|_| ApiError::internal("Failed to create files directory"))?;
        match spooled {
            Some(mut file) => {
                file.flush()
                    .await
                    .map_err(|_| ApiError::internal("Failed to spool upload"))?;
                drop(file);
                tokio::fs::rename(&spool_path, &dest)
                    .await
                    .map_err(|_| ApiError::internal("Failed to store attachment"))?;
            }
            None => {
                tokio::fs::write(&dest, &buffer)
                    .await
                    .map_err(|_| ApiError::internal("Failed to store attachment"))?;
            }
        }
    }
    Ok(hash)
}

async fn receive_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<UploadedTiddler, ApiError> {
    let guard = StagingGuard::create(&state.config.staging_dir())?;
    let files_dir = state.config.files_dir();

    let mut fields: HashMap<String, String> = HashMap::new();
    let mut attachment_hash: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        if let Some(key) = name.strip_prefix(FIELD_PART_PREFIX) {
            let key = key.to_string();
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?;
            fields.insert(key, value);
        } else if name == FILE_PART {
            let media_type = field.content_type().map(str::to_string);
            let hash = receive_file_part(&mut field, &guard, &files_dir).await?;
            if let Some(media_type) = media_type {
                fields.entry("type".to_string()).or_insert(media_type);
            }
            attachment_hash = Some(hash);
        }
        // unknown parts are ignored
    }

    Ok(UploadedTiddler {
        fields,
        attachment_hash,
    })
}

fn store_upload(
    state: &AppState,
    bag_id: i64,
    bag_name: &str,
    upload: UploadedTiddler,
) -> Result<Response, ApiError> {
    let revision_id = state
        .store
        .save_tiddler(bag_id, &upload.fields, upload.attachment_hash.as_deref())
        .api_err("Failed to save tiddler")?;
    let title = upload.fields.get("title").cloned().unwrap_or_default();

    publish(
        &state.changes,
        TiddlerChange {
            bag_name: bag_name.to_string(),
            title,
            revision_id,
            is_deleted: false,
        },
    );

    let body = serde_json::json!({
        "data": { "bag_name": bag_name, "revision_id": revision_id },
        "error": null,
    });
    Response::builder()
        .status(axum::http::StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .header(axum::http::header::ETAG, format!("\"{revision_id}\""))
        .header("x-revision-number", revision_id.to_string())
        .header("x-bag-name", bag_name)
        .body(axum::body::Body::from(body.to_string()))
        .map_err(|_| ApiError::internal("Failed to build response"))
}

pub async fn bag_upload(
    State(state): State<Arc<AppState>>,
    Path(bag_name): Path<String>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let grant = access::require_bag_write(state.store.as_ref(), &user, &bag_name)?;
    let upload = receive_upload(&state, multipart).await?;
    store_upload(&state, grant.bag.id, &grant.bag.name, upload)
}

pub async fn recipe_upload(
    State(state): State<Arc<AppState>>,
    Path(recipe_name): Path<String>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let grant = access::require_recipe_write(state.store.as_ref(), &user, &recipe_name)?;
    let upload = receive_upload(&state, multipart).await?;
    store_upload(&state, grant.writable.bag_id, &grant.writable.bag_name, upload)
}
