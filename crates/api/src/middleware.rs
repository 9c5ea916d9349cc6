//! The request pipeline, outermost first:
//!
//! security headers → CORS/logging → rate limiting → authentication
//! (bearer or session, with inactivity and lockout checks) → CSRF → RBAC.
//!
//! Each stage may short-circuit with a structured error; only a request that
//! clears every stage reaches a handler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use keystone_auth::{
    AuthError, CSRF_HEADER, RateLimitStatus, RouteClass, api_relative_path, authorize,
    clear_session_cookie, extract_session_token, requires_csrf, session_cookie,
};

use crate::app::errors::auth_error_to_response;
use crate::app::services::AppServices;
use crate::context::{AuthMethod, PrincipalContext};

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:; font-src 'self'; connect-src 'self'; frame-ancestors 'none'; base-uri 'self'; form-action 'self'";
const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=(), payment=()";
const HSTS: &str = "max-age=31536000; includeSubDomains";

const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// API paths reachable without a credential.
pub fn is_public_api_path(path: &str) -> bool {
    path == "/api/v1/openapi.json"
        || path.starts_with("/api/v1/auth/")
        || path.starts_with("/api/auth/")
}

fn is_protected(path: &str) -> bool {
    path.starts_with("/api/") && !is_public_api_path(path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Security headers
// ─────────────────────────────────────────────────────────────────────────────

pub async fn security_headers(req: Request, next: Next) -> Response {
    let encrypted = connection_is_encrypted(req.headers());
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static(PERMISSIONS_POLICY),
    );
    if encrypted {
        headers.insert(header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
    }
    response
}

/// TLS terminates upstream; trust the proxy's forwarded scheme.
fn connection_is_encrypted(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

// ─────────────────────────────────────────────────────────────────────────────
// CORS + request logging
// ─────────────────────────────────────────────────────────────────────────────

pub async fn cors_and_logging(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let allowed_origin = req
        .headers()
        .get(header::ORIGIN)
        .filter(|origin| {
            origin
                .to_str()
                .is_ok_and(|o| services.allowed_origins.iter().any(|a| a == o))
        })
        .cloned();

    let mut response = if method == Method::OPTIONS {
        let mut preflight = StatusCode::OK.into_response();
        let headers = preflight.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization, X-CSRF-Token"),
        );
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
        preflight
    } else {
        next.run(req).await
    };

    if let Some(origin) = allowed_origin {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

// ─────────────────────────────────────────────────────────────────────────────
// Rate limiting
// ─────────────────────────────────────────────────────────────────────────────

pub async fn rate_limit(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(class) = RouteClass::for_path(req.uri().path()) else {
        return next.run(req).await;
    };

    let client = client_key(&req);
    let rule = services.rate_limits.rule_for(class);
    let now = Utc::now();
    let status = services
        .rate_limiter
        .check_at(&class.bucket_key(&client), rule.limit, rule.window, now);

    if status.exceeded {
        warn!(client = %client, class = class.key_prefix(), "rate limit exceeded");
        let mut response = auth_error_to_response(AuthError::RateLimited {
            retry_after_secs: status.retry_after_secs(now),
        });
        apply_rate_limit_headers(response.headers_mut(), &status);
        return response;
    }

    let mut response = next.run(req).await;
    apply_rate_limit_headers(response.headers_mut(), &status);
    response
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the peer address.
fn client_key(req: &Request) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        req.headers()
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(ip) = forwarded.or_else(real_ip) {
        return ip.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    let pairs = [
        (X_RATELIMIT_LIMIT, status.limit.to_string()),
        (X_RATELIMIT_REMAINING, status.remaining.to_string()),
        (X_RATELIMIT_RESET, status.reset_at.timestamp().to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────────────

pub async fn authenticate(
    State(services): State<Arc<AppServices>>,
    mut req: Request,
    next: Next,
) -> Response {
    if !is_protected(req.uri().path()) {
        return next.run(req).await;
    }
    let now = Utc::now();

    if let Some(token) = bearer_token(req.headers()) {
        let Some(identity) = services.bearer.validate(&token).await else {
            warn!(path = %req.uri().path(), "rejected bearer credential");
            return auth_error_to_response(AuthError::Unauthorized);
        };
        req.extensions_mut().insert(PrincipalContext::new(
            identity.user_id,
            identity.role,
            AuthMethod::Bearer {
                key_id: identity.key_id,
                label: identity.label,
            },
        ));
        return next.run(req).await;
    }

    let Some(token) = session_token(req.headers()) else {
        return auth_error_to_response(AuthError::Unauthorized);
    };

    match authenticate_session(&services, &token, now).await {
        Ok((principal, expires_at)) => {
            req.extensions_mut().insert(principal);
            let mut response = next.run(req).await;
            append_cookie(response.headers_mut(), &session_cookie(&token, expires_at));
            response
        }
        Err(err @ AuthError::SessionTimeout) => {
            let mut response = auth_error_to_response(err);
            append_cookie(response.headers_mut(), &clear_session_cookie());
            response
        }
        Err(err) => auth_error_to_response(err),
    }
}

/// Validate → lockout check → renew. The inactivity check inside
/// validation runs before renewal.
async fn authenticate_session(
    services: &AppServices,
    token: &str,
    now: DateTime<Utc>,
) -> Result<(PrincipalContext, DateTime<Utc>), AuthError> {
    let session = services.sessions.validate_at(token, now).await?;

    if services
        .lockout
        .is_locked_at(&session.user.username, now)
        .await?
    {
        warn!(user_id = %session.user.id, "session rejected: account locked");
        return Err(AuthError::AccountLocked);
    }

    let expires_at = services.sessions.renew_at(&session, now).await;
    let principal = PrincipalContext::new(session.user.id, session.user.role, AuthMethod::Session);
    Ok((principal, expires_at))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Session token from any `Cookie` header on the request.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(extract_session_token)
        .map(str::to_string)
}

pub fn append_cookie(headers: &mut HeaderMap, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        headers.append(header::SET_COOKIE, value);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CSRF
// ─────────────────────────────────────────────────────────────────────────────

pub async fn csrf_protect(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let principal = req.extensions().get::<PrincipalContext>().cloned();
    let bearer = principal.as_ref().is_some_and(PrincipalContext::is_bearer);

    if is_public_api_path(&path) || !requires_csrf(req.method().as_str(), &path, bearer) {
        return next.run(req).await;
    }

    let now = Utc::now();
    let user_id = match principal {
        Some(principal) => Some(principal.user_id()),
        None => match session_token(req.headers()) {
            Some(token) => match services.sessions.lookup_user_at(&token, now).await {
                Ok(user_id) => user_id,
                Err(err) => return auth_error_to_response(err),
            },
            None => None,
        },
    };
    let Some(user_id) = user_id else {
        return auth_error_to_response(AuthError::Unauthorized);
    };

    let presented = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Err(err) = services
        .csrf
        .validate_at(presented.as_deref(), user_id, now)
        .await
    {
        warn!(user_id = %user_id, path = %path, code = err.code(), "CSRF check failed");
        return auth_error_to_response(err);
    }
    next.run(req).await
}

// ─────────────────────────────────────────────────────────────────────────────
// RBAC
// ─────────────────────────────────────────────────────────────────────────────

pub async fn authorize_request(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if !is_protected(&path) {
        return next.run(req).await;
    }
    let Some(api_path) = api_relative_path(&path) else {
        return next.run(req).await;
    };
    let Some(principal) = req.extensions().get::<PrincipalContext>() else {
        return auth_error_to_response(AuthError::Unauthorized);
    };

    if let Err(err) = authorize(
        &services.permissions,
        principal.role(),
        api_path,
        req.method().as_str(),
    ) {
        warn!(user_id = %principal.user_id(), path = %path, "request denied by RBAC");
        return auth_error_to_response(err);
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, middleware::from_fn_with_state, routing::post};
    use chrono::Duration;
    use keystone_auth::{InMemoryAuthStore, Stores};
    use keystone_core::UserId;
    use tower::ServiceExt;

    use crate::app::services::ServiceOptions;

    #[test]
    fn public_paths() {
        assert!(is_public_api_path("/api/v1/openapi.json"));
        assert!(is_public_api_path("/api/v1/auth/login"));
        assert!(!is_public_api_path("/api/v1/parts"));
        assert!(is_protected("/api/v1/parts"));
        assert!(!is_protected("/health"));
        assert!(!is_protected("/api/v1/auth/logout"));
    }

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer sk-1"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("sk-1"));
    }

    #[test]
    fn client_key_prefers_first_forwarded_address() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.2")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), "203.0.113.7");

        let req = Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), "198.51.100.2");

        let req = Request::builder().body(axum::body::Body::empty()).unwrap();
        assert_eq!(client_key(&req), "unknown");
    }

    fn services() -> Arc<AppServices> {
        Arc::new(AppServices::new(
            Stores::from_backend(Arc::new(InMemoryAuthStore::new())),
            ServiceOptions::default(),
        ))
    }

    /// Only the CSRF stage, so no principal is ever placed in the context.
    fn csrf_only(services: Arc<AppServices>) -> Router {
        Router::new()
            .route("/api/v1/parts", post(|| async { "created" }))
            .layer(from_fn_with_state(services, csrf_protect))
    }

    async fn post_parts(
        services: &Arc<AppServices>,
        session: &str,
        csrf: &str,
    ) -> (StatusCode, Option<String>) {
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/parts")
            .header(header::COOKIE, format!("keystone_session={session}"))
            .header(CSRF_HEADER, csrf)
            .body(Body::empty())
            .unwrap();
        let res = csrf_only(services.clone()).oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let code = serde_json::from_slice::<serde_json::Value>(&bytes)
            .ok()
            .and_then(|v| v["code"].as_str().map(str::to_string));
        (status, code)
    }

    #[tokio::test]
    async fn resolves_the_user_from_the_session_cookie() {
        let services = services();
        let now = Utc::now();
        let alice = UserId::new();
        let bob = UserId::new();
        let session = services.sessions.create_session_at(alice, now).await.unwrap();
        let alices = services.csrf.issue_at(alice, now).await.unwrap();
        let bobs = services.csrf.issue_at(bob, now).await.unwrap();

        assert_eq!(
            post_parts(&services, &session.token, &bobs.token).await,
            (StatusCode::FORBIDDEN, Some("CSRF_TOKEN_MISMATCH".to_string()))
        );
        assert_eq!(
            post_parts(&services, &session.token, &alices.token).await,
            (StatusCode::OK, None)
        );
    }

    #[tokio::test]
    async fn idle_or_expired_sessions_resolve_to_nobody() {
        let services = services();
        let now = Utc::now();
        let alice = UserId::new();
        let csrf = services.csrf.issue_at(alice, now).await.unwrap();

        let idle = services
            .sessions
            .create_session_at(alice, now - Duration::hours(1))
            .await
            .unwrap();
        let expired = services
            .sessions
            .create_session_at(alice, now - Duration::hours(25))
            .await
            .unwrap();

        for session in [&idle, &expired] {
            assert_eq!(
                post_parts(&services, &session.token, &csrf.token).await,
                (StatusCode::UNAUTHORIZED, Some("UNAUTHORIZED".to_string()))
            );
        }
        assert_eq!(
            post_parts(&services, "unknown", &csrf.token).await,
            (StatusCode::UNAUTHORIZED, Some("UNAUTHORIZED".to_string()))
        );
    }

    #[test]
    fn session_token_is_found_among_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(
            header::COOKIE,
            HeaderValue::from_static("a=1; keystone_session=tok-123"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("tok-123"));
    }
}
