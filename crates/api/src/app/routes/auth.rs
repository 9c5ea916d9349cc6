//! Login, logout and password reset. These paths are public: the
//! authentication and CSRF stages skip them.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use keystone_auth::{AuthError, clear_session_cookie, session_cookie};

use crate::app::routes::common::json_body;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::middleware::{append_cookie, session_token};

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::LoginRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match json_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    match perform_login(&services, body, Utc::now()).await {
        Ok(response) => response,
        Err(err) => errors::auth_error_to_response(err),
    }
}

/// Lockout check → credential check → counter bookkeeping → session + CSRF.
async fn perform_login(
    services: &AppServices,
    body: dto::LoginRequest,
    now: DateTime<Utc>,
) -> Result<axum::response::Response, AuthError> {
    if services.lockout.is_locked_at(&body.username, now).await? {
        warn!(username = %body.username, "login refused: account locked");
        return Err(AuthError::AccountLocked);
    }

    let Some(user) = services
        .passwords
        .verify_credentials(&body.username, &body.password)
        .await?
    else {
        if let Err(e) = services
            .lockout
            .increment_failed_attempts_at(&body.username, now)
            .await
        {
            error!(username = %body.username, "failed to record failed login: {e}");
        }
        warn!(username = %body.username, "login failed");
        return Err(AuthError::InvalidCredentials);
    };

    services.lockout.reset_failed_attempts(&user.username).await?;
    if !user.active {
        warn!(user_id = %user.id, "login refused: account deactivated");
        return Err(AuthError::forbidden("account is deactivated"));
    }

    let session = services.sessions.create_session_at(user.id, now).await?;
    let csrf = services.csrf.issue_at(user.id, now).await?;
    info!(user_id = %user.id, "login succeeded");

    let mut response = (
        StatusCode::OK,
        Json(dto::LoginResponse {
            user: dto::UserSummary::from(&user),
            csrf_token: csrf.token,
            session_expires_at: session.record.expires_at,
        }),
    )
        .into_response();
    append_cookie(
        response.headers_mut(),
        &session_cookie(&session.token, session.record.expires_at),
    );
    Ok(response)
}

/// Always succeeds; an unknown or missing session is already logged out.
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Some(token) = session_token(&headers) {
        if let Err(e) = services.sessions.destroy(&token).await {
            error!("failed to delete session on logout: {e}");
        }
    }
    let mut response = StatusCode::NO_CONTENT.into_response();
    append_cookie(response.headers_mut(), &clear_session_cookie());
    response
}

/// Responds 202 whether or not the username exists.
pub async fn request_password_reset(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::PasswordResetRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match json_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    match services
        .passwords
        .generate_reset_token_at(&body.username, services.tokens.as_ref(), Utc::now())
        .await
    {
        Ok((user_id, token)) => services.reset_sink.deliver(&body.username, user_id, &token),
        Err(AuthError::UnknownUser) => debug!("password reset requested for unknown user"),
        Err(err) => return errors::auth_error_to_response(err),
    }

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
        .into_response()
}

/// Redeem a reset token. Every session of the user is revoked on success.
pub async fn confirm_password_reset(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::PasswordResetConfirm>, JsonRejection>,
) -> axum::response::Response {
    let body = match json_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    let result = async {
        let user_id = services
            .passwords
            .reset_with_token_at(&body.token, &body.new_password, Utc::now())
            .await?;
        let revoked = services.sessions.revoke_all(user_id).await?;
        Ok::<_, AuthError>(revoked)
    }
    .await;

    match result {
        Ok(revoked) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "password_reset",
                "sessions_revoked": revoked,
            })),
        )
            .into_response(),
        Err(err) => errors::auth_error_to_response(err),
    }
}
