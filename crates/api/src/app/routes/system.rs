use axum::{Json, http::StatusCode, response::IntoResponse};

use crate::app::errors;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn not_found() -> axum::response::Response {
    errors::json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "not found")
}

/// Minimal description of the control-plane surface.
pub async fn openapi() -> axum::response::Response {
    let doc = serde_json::json!({
        "openapi": "3.0.3",
        "info": { "title": "keystone", "version": env!("CARGO_PKG_VERSION") },
        "paths": {
            "/health": { "get": { "summary": "Liveness probe" } },
            "/api/v1/auth/login": { "post": { "summary": "Start a session" } },
            "/api/v1/auth/logout": { "post": { "summary": "End the current session" } },
            "/api/v1/auth/password-reset/request": { "post": { "summary": "Issue a password reset token" } },
            "/api/v1/auth/password-reset/confirm": { "post": { "summary": "Reset a password with a token" } },
            "/api/v1/me": { "get": { "summary": "Current identity and grants" } },
            "/api/v1/csrf-token": { "get": { "summary": "Issue a CSRF token" } },
            "/api/v1/account/password": { "post": { "summary": "Change the current password" } },
            "/api/v1/roles": { "get": { "summary": "List roles" } },
            "/api/v1/roles/{role}/permissions": {
                "get": { "summary": "Grants held by a role" },
                "put": { "summary": "Replace a role's grants" }
            }
        }
    });
    (StatusCode::OK, Json(doc)).into_response()
}
