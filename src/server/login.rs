//! The two-step login boundary.
//!
//! Step 1 takes a username and answers with an exchange handle and an opaque
//! challenge blob. Step 2 returns the blob folded together with the
//! credential; the server verifies it against the stored argon2 hash and
//! sets the session cookie. The blob layout is not part of the wire
//! contract and unknown usernames still get a challenge, so the two failure
//! shapes are indistinguishable to a caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{AppendHeaders, IntoResponse};
use axum::routing::post;
use axum::{Json, Router};
use uuid::Uuid;

use crate::auth::{
    SESSION_COOKIE, cookie_value, decode_finish_blob, generate_exchange_nonce,
    session_clear_cookie, session_set_cookie,
};
use crate::server::AppState;
use crate::server::dto::{
    LoginFinishRequest, LoginFinishResponse, LoginStartRequest, LoginStartResponse,
};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::router::PendingLogin;

const EXCHANGE_TTL: Duration = Duration::from_secs(60);

fn invalid_credentials() -> ApiError {
    ApiError::unauthorized("Invalid credentials")
}

pub fn login_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login/1", post(login_start))
        .route("/login/2", post(login_finish))
        .route("/logout", post(logout))
}

async fn login_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginStartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // an unknown username still gets an exchange; it fails at step 2
    let user_id = state
        .store
        .get_user_by_username(&req.username)
        .api_err("Failed to look up user")?
        .map_or(0, |u| u.id);

    let exchange_id = Uuid::new_v4().to_string();
    let nonce = generate_exchange_nonce();

    let mut exchanges = state
        .login_exchanges
        .lock()
        .map_err(|_| ApiError::internal("Login exchange state unavailable"))?;
    exchanges.retain(|_, pending| pending.started_at.elapsed() < EXCHANGE_TTL);
    exchanges.insert(
        exchange_id.clone(),
        PendingLogin {
            user_id,
            nonce: nonce.clone(),
            started_at: Instant::now(),
        },
    );
    drop(exchanges);

    Ok(Json(ApiResponse::success(LoginStartResponse {
        exchange_id,
        challenge: nonce,
    })))
}

async fn login_finish(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginFinishRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pending = state
        .login_exchanges
        .lock()
        .map_err(|_| ApiError::internal("Login exchange state unavailable"))?
        .remove(&req.exchange_id)
        .ok_or_else(invalid_credentials)?;

    if pending.started_at.elapsed() >= EXCHANGE_TTL {
        return Err(invalid_credentials());
    }

    // blob layout: challenge, newline, credential
    let decoded = decode_finish_blob(&req.response).map_err(|_| invalid_credentials())?;
    let (challenge, password) = decoded.split_once('\n').ok_or_else(invalid_credentials)?;
    if challenge != pending.nonce || pending.user_id == 0 {
        return Err(invalid_credentials());
    }

    let hash = state
        .store
        .get_user_password_hash(pending.user_id)
        .api_err("Failed to look up credentials")?
        .ok_or_else(invalid_credentials)?;
    if !state
        .hasher
        .verify(password, &hash)
        .api_err("Failed to verify credentials")?
    {
        return Err(invalid_credentials());
    }

    let user = state
        .store
        .get_user(pending.user_id)
        .api_err("Failed to look up user")?
        .ok_or_else(invalid_credentials)?;
    let session = state
        .store
        .create_session(user.id)
        .api_err("Failed to create session")?;

    tracing::info!("user {} logged in", user.username);

    Ok((
        AppendHeaders([(header::SET_COOKIE, session_set_cookie(&session.id))]),
        Json(ApiResponse::success(LoginFinishResponse {
            username: user.username,
        })),
    ))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(session_id) = cookie_value(&headers, SESSION_COOKIE) {
        state
            .store
            .delete_session(&session_id)
            .api_err("Failed to delete session")?;
    }
    Ok((
        AppendHeaders([(header::SET_COOKIE, session_clear_cookie())]),
        Json(ApiResponse::success(serde_json::json!({ "logged_out": true }))),
    ))
}
