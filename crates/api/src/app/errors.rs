use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use keystone_auth::AuthError;

/// HTTP status for each control-plane condition.
pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::WeakPassword(_)
        | AuthError::PasswordReused
        | AuthError::InvalidOrExpiredToken => StatusCode::BAD_REQUEST,
        AuthError::Unauthorized | AuthError::SessionTimeout | AuthError::InvalidCredentials => {
            StatusCode::UNAUTHORIZED
        }
        AuthError::AccountLocked
        | AuthError::Forbidden(_)
        | AuthError::CsrfMissing
        | AuthError::CsrfInvalid
        | AuthError::CsrfMismatch => StatusCode::FORBIDDEN,
        AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        AuthError::UnknownUser => StatusCode::NOT_FOUND,
        AuthError::Store(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn auth_error_to_response(err: AuthError) -> axum::response::Response {
    let status = status_for(&err);
    let message = match &err {
        AuthError::Store(_) | AuthError::Internal(_) => {
            error!("request failed: {err}");
            "internal error".to_string()
        }
        other => other.to_string(),
    };

    let mut response = json_error(status, err.code(), message);
    if let AuthError::RateLimited { retry_after_secs } = err {
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

/// Malformed request bodies share the structured error shape.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": message.into(),
            "code": code,
        })),
    )
        .into_response()
}
