//! Endpoints for the authenticated caller's own account.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;

use keystone_auth::AuthError;

use crate::app::routes::common::json_body;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    let grants = services.permissions.role_permissions(principal.role().as_str());
    (
        StatusCode::OK,
        Json(dto::WhoAmIResponse {
            user_id: principal.user_id(),
            role: principal.role().to_string(),
            auth: principal.method().clone(),
            permissions: dto::grants_to_dto(&grants),
        }),
    )
        .into_response()
}

pub async fn issue_csrf_token(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    // Bearer callers are exempt from CSRF and have no session to bind to.
    if principal.is_bearer() {
        return errors::auth_error_to_response(AuthError::forbidden(
            "CSRF tokens are issued to session callers only",
        ));
    }
    match services.csrf.issue_at(principal.user_id(), Utc::now()).await {
        Ok(record) => (
            StatusCode::OK,
            Json(dto::CsrfTokenResponse {
                csrf_token: record.token,
                expires_at: record.expires_at,
            }),
        )
            .into_response(),
        Err(err) => errors::auth_error_to_response(err),
    }
}

pub async fn change_password(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::ChangePasswordRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match json_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    match services
        .passwords
        .change_password_at(
            principal.user_id(),
            &body.current_password,
            &body.new_password,
            Utc::now(),
        )
        .await
    {
        Ok(()) => {
            info!(user_id = %principal.user_id(), "password changed");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => errors::auth_error_to_response(err),
    }
}
