use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, header::COOKIE, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::server::AppState;
use crate::types::User;

pub const SESSION_COOKIE: &str = "session";

/// Reads one cookie value out of the Cookie header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

#[must_use]
pub fn session_set_cookie(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Strict")
}

#[must_use]
pub fn session_clear_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}

/// The authenticated user for this request. Resolves the session cookie; an
/// absent or stale session yields the anonymous sentinel rather than a
/// rejection, so every handler sees a complete `User`.
pub struct AuthUser(pub User);

/// Rejects unless the resolved user holds the ADMIN role.
pub struct RequireAdmin(pub User);

#[derive(Debug)]
pub enum AuthError {
    NotLoggedIn,
    NotAdmin,
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::NotLoggedIn => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::NotAdmin => (StatusCode::FORBIDDEN, "Admin access required"),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "data": null, "error": message });
        (status, Json(body)).into_response()
    }
}

async fn resolve_user(parts: &Parts, state: &Arc<AppState>) -> User {
    let Some(session_id) = cookie_value(&parts.headers, SESSION_COOKIE) else {
        return User::anonymous();
    };

    let session = match state.store.get_session(&session_id) {
        Ok(Some(session)) => session,
        Ok(None) => return User::anonymous(),
        Err(e) => {
            tracing::warn!("session lookup failed: {e}");
            return User::anonymous();
        }
    };

    match state.store.get_user(session.user_id) {
        Ok(Some(user)) => user,
        Ok(None) => User::anonymous(),
        Err(e) => {
            tracing::warn!("user lookup failed: {e}");
            User::anonymous()
        }
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(AuthUser(resolve_user(parts, state).await))
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = resolve_user(parts, state).await;
        if !user.is_logged_in() {
            return Err(AuthError::NotLoggedIn);
        }
        if !state.user_is_admin(&user) {
            return Err(AuthError::NotAdmin);
        }
        Ok(RequireAdmin(user))
    }
}
