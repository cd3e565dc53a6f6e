//! The admin surface: one `POST /admin/{operation}` JSON envelope per
//! mutation, plus the list reads. Every state-changing call is guarded by a
//! Referer/Origin check because the surface is cookie-authenticated.

mod bags;
mod recipes;
mod roles;
mod users;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;

use crate::server::AppState;
use crate::server::response::ApiError;

pub fn admin_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/upsert-bag", post(bags::upsert_bag))
        .route("/delete-bag", post(bags::delete_bag))
        .route("/set-bag-acl", post(bags::set_bag_acl))
        .route("/list-bags", post(bags::list_bags))
        .route("/upsert-recipe", post(recipes::upsert_recipe))
        .route("/delete-recipe", post(recipes::delete_recipe))
        .route("/set-recipe-acl", post(recipes::set_recipe_acl))
        .route("/list-recipes", post(recipes::list_recipes))
        .route("/create-user", post(users::create_user))
        .route("/update-user", post(users::update_user))
        .route("/delete-user", post(users::delete_user))
        .route("/set-user-password", post(users::set_user_password))
        .route("/set-user-roles", post(users::set_user_roles))
        .route("/list-users", post(users::list_users))
        .route("/create-role", post(roles::create_role))
        .route("/rename-role", post(roles::rename_role))
        .route("/delete-role", post(roles::delete_role))
        .route("/list-roles", post(roles::list_roles))
        .layer(middleware::from_fn_with_state(state, csrf_guard))
}

fn strip_scheme(url: &str) -> Option<&str> {
    url.strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
}

/// Accepts the request only when Origin matches the Host header, or Referer
/// points at this host under the admin path prefix.
fn same_origin(headers: &HeaderMap, admin_prefix: &str) -> bool {
    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return false;
    };

    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        return strip_scheme(origin)
            .is_some_and(|rest| rest.trim_end_matches('/') == host);
    }

    if let Some(referer) = headers.get(header::REFERER).and_then(|v| v.to_str().ok()) {
        let Some(rest) = strip_scheme(referer) else {
            return false;
        };
        let Some((referer_host, path)) = rest.split_once('/') else {
            return false;
        };
        return referer_host == host && format!("/{path}").starts_with(admin_prefix);
    }

    false
}

async fn csrf_guard(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::POST
        && !same_origin(request.headers(), &state.config.admin_path_prefix)
    {
        return ApiError::forbidden("Cross-site request rejected").into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_matching_origin_passes() {
        let h = headers(&[("host", "wiki.test:8080"), ("origin", "http://wiki.test:8080")]);
        assert!(same_origin(&h, "/admin"));
    }

    #[test]
    fn test_foreign_origin_rejected() {
        let h = headers(&[("host", "wiki.test:8080"), ("origin", "http://evil.test")]);
        assert!(!same_origin(&h, "/admin"));
    }

    #[test]
    fn test_referer_must_sit_under_admin_prefix() {
        let ok = headers(&[
            ("host", "wiki.test"),
            ("referer", "http://wiki.test/admin/bags"),
        ]);
        assert!(same_origin(&ok, "/admin"));

        let elsewhere = headers(&[
            ("host", "wiki.test"),
            ("referer", "http://wiki.test/wiki/main"),
        ]);
        assert!(!same_origin(&elsewhere, "/admin"));
    }

    #[test]
    fn test_missing_headers_rejected() {
        let h = headers(&[("host", "wiki.test")]);
        assert!(!same_origin(&h, "/admin"));
    }
}
