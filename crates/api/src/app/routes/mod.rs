use axum::{
    Router,
    routing::{get, post},
};

pub mod account;
pub mod auth;
pub mod common;
pub mod roles;
pub mod system;

/// Control-plane endpoints. Business routes are merged in by the caller.
pub fn router() -> Router {
    Router::new()
        .route("/api/v1/openapi.json", get(system::openapi))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route(
            "/api/v1/auth/password-reset/request",
            post(auth::request_password_reset),
        )
        .route(
            "/api/v1/auth/password-reset/confirm",
            post(auth::confirm_password_reset),
        )
        .route("/api/v1/me", get(account::whoami))
        .route("/api/v1/csrf-token", get(account::issue_csrf_token))
        .route("/api/v1/account/password", post(account::change_password))
        .route("/api/v1/roles", get(roles::list_roles))
        .route(
            "/api/v1/roles/:role/permissions",
            get(roles::get_role_permissions).put(roles::set_role_permissions),
        )
}
