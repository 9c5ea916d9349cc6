use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, put},
};
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};

use keystone_api::app::build_app;
use keystone_api::app::services::{AppServices, ServiceOptions};
use keystone_auth::{
    InMemoryAuthStore, RateLimitRule, RateLimits, Role, SessionPolicy, Stores, store::UserRecord,
};
use keystone_infra::{ApiKeyValidator, RecordingResetTokenSink};

const PASSWORD: &str = "Correct-Horse-9";
const API_KEY: &str = "sk-test-machine";

struct TestOptions {
    rate_limits: RateLimits,
    session: SessionPolicy,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            rate_limits: RateLimits {
                login: RateLimitRule {
                    limit: 100,
                    window: ChronoDuration::minutes(1),
                },
                api: RateLimitRule {
                    limit: 1000,
                    window: ChronoDuration::minutes(1),
                },
            },
            session: SessionPolicy::default(),
        }
    }
}

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    reset_sink: Arc<RecordingResetTokenSink>,
    alice: UserRecord,
    bob: UserRecord,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(TestOptions::default()).await
    }

    async fn spawn_with(options: TestOptions) -> Self {
        let stores = Stores::from_backend(Arc::new(InMemoryAuthStore::new()));
        let reset_sink = Arc::new(RecordingResetTokenSink::new());

        // The machine key belongs to a dedicated service user.
        let service_user = keystone_core::UserId::new();
        let api_keys = ApiKeyValidator::parse(&format!("{API_KEY}:{service_user}:user")).unwrap();

        let services = Arc::new(AppServices::new(
            stores,
            ServiceOptions {
                rate_limits: options.rate_limits,
                session: options.session,
                allowed_origins: vec!["https://app.example.com".to_string()],
                bearer: Arc::new(api_keys),
                reset_sink: reset_sink.clone(),
                ..ServiceOptions::default()
            },
        ));
        services.initialize().await.unwrap();

        let now = Utc::now();
        let alice = services
            .passwords
            .create_user_at("alice", PASSWORD, Role::USER, now)
            .await
            .unwrap();
        let bob = services
            .passwords
            .create_user_at("bob", PASSWORD, Role::USER, now)
            .await
            .unwrap();
        services
            .passwords
            .create_user_at("rita", PASSWORD, Role::READONLY, now)
            .await
            .unwrap();
        services
            .passwords
            .create_user_at("root", PASSWORD, Role::ADMIN, now)
            .await
            .unwrap();

        // Build app (same router as prod), but bind to an ephemeral port.
        let app = build_app(services.clone(), business_routes());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            base_url,
            services,
            reset_sink,
            alice,
            bob,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Stand-in for the business layer.
fn business_routes() -> Router {
    async fn ok() -> Json<Value> {
        Json(json!({ "ok": true }))
    }

    Router::new()
        .route("/api/v1/parts", get(ok).post(ok))
        .route("/api/v1/parts/:id", get(ok).put(ok).delete(ok))
        .route("/api/v1/parts/:id/approve", put(ok))
        .route("/api/v1/inventory", get(ok))
        .route("/api/v1/dashboard", get(ok))
        .route("/api/v1/users", get(ok))
}

struct Session {
    cookie: String,
    csrf: String,
}

async fn login(client: &reqwest::Client, srv: &TestServer, username: &str, password: &str) -> Session {
    let res = client
        .post(srv.url("/api/v1/auth/login"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK, "login failed for {username}");
    let cookie = session_cookie_pair(&res).expect("login must set the session cookie");
    let body: Value = res.json().await.unwrap();
    Session {
        cookie,
        csrf: body["csrf_token"].as_str().unwrap().to_string(),
    }
}

/// `name=value` part of the session `Set-Cookie` header.
fn session_cookie_pair(res: &reqwest::Response) -> Option<String> {
    res.headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("keystone_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

async fn error_code(res: reqwest::Response) -> String {
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].is_string(), "error body must carry a message: {body}");
    body["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_and_openapi_are_public() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-frame-options"], "DENY");
    assert_eq!(res.headers()["x-content-type-options"], "nosniff");
    assert!(res.headers().get("strict-transport-security").is_none());

    let res = client
        .get(srv.url("/api/v1/openapi.json"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let doc: Value = res.json().await.unwrap();
    assert!(doc["paths"]["/api/v1/auth/login"].is_object());
}

#[tokio::test]
async fn hsts_only_when_forwarded_over_tls() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .get(srv.url("/health"))
        .header("x-forwarded-proto", "https")
        .send()
        .await
        .unwrap();
    assert!(res.headers().get("strict-transport-security").is_some());
}

#[tokio::test]
async fn api_requires_authentication() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/api/v1/parts")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "UNAUTHORIZED");

    let res = client
        .get(srv.url("/api/v1/parts"))
        .header("cookie", "keystone_session=forged")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_sets_hardened_cookie_and_renews_it() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/v1/auth/login"))
        .json(&json!({ "username": "alice", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let set_cookie = res.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("Secure"));
    assert!(set_cookie.contains("SameSite=Lax"));
    let cookie = session_cookie_pair(&res).unwrap();

    let res = client
        .get(srv.url("/api/v1/me"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    // Renewal reissues the same token with a fresh expiry.
    assert_eq!(session_cookie_pair(&res).as_deref(), Some(cookie.as_str()));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["user_id"], srv.alice.id.to_string());
    assert_eq!(body["role"], "user");
    assert_eq!(body["auth"]["kind"], "session");
}

#[tokio::test]
async fn wrong_password_is_indistinguishable_from_unknown_user() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for username in ["alice", "nobody"] {
        let res = client
            .post(srv.url("/api/v1/auth/login"))
            .json(&json!({ "username": username, "password": "Wrong-Horse-99" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(res).await, "INVALID_CREDENTIALS");
    }
}

#[tokio::test]
async fn ten_failures_lock_the_account() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for _ in 0..10 {
        let res = client
            .post(srv.url("/api/v1/auth/login"))
            .json(&json!({ "username": "bob", "password": "Wrong-Horse-99" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    let res = client
        .post(srv.url("/api/v1/auth/login"))
        .json(&json!({ "username": "bob", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "ACCOUNT_LOCKED");
}

#[tokio::test]
async fn malformed_login_body_is_a_structured_error() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(srv.url("/api/v1/auth/login"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "BAD_REQUEST");
}

#[tokio::test]
async fn csrf_rejections_are_distinct() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let alice = login(&client, &srv, "alice", PASSWORD).await;
    let bob = login(&client, &srv, "bob", PASSWORD).await;

    let res = client
        .post(srv.url("/api/v1/parts"))
        .header("cookie", &alice.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "CSRF_TOKEN_MISSING");

    let res = client
        .post(srv.url("/api/v1/parts"))
        .header("cookie", &alice.cookie)
        .header("x-csrf-token", "forged")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "CSRF_TOKEN_INVALID");

    let res = client
        .post(srv.url("/api/v1/parts"))
        .header("cookie", &alice.cookie)
        .header("x-csrf-token", &bob.csrf)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "CSRF_TOKEN_MISMATCH");

    let res = client
        .post(srv.url("/api/v1/parts"))
        .header("cookie", &alice.cookie)
        .header("x-csrf-token", &alice.csrf)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Safe methods never need a token.
    let res = client
        .get(srv.url("/api/v1/parts"))
        .header("cookie", &alice.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn fresh_csrf_token_can_be_requested() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let alice = login(&client, &srv, "alice", PASSWORD).await;

    let res = client
        .get(srv.url("/api/v1/csrf-token"))
        .header("cookie", &alice.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let token = body["csrf_token"].as_str().unwrap();
    assert_ne!(token, alice.csrf);

    let res = client
        .delete(srv.url("/api/v1/parts/7"))
        .header("cookie", &alice.cookie)
        .header("x-csrf-token", token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn bearer_credentials_bypass_csrf() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/v1/parts"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(session_cookie_pair(&res).is_none());

    let res = client
        .get(srv.url("/api/v1/me"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["auth"]["kind"], "bearer");

    let res = client
        .get(srv.url("/api/v1/csrf-token"))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "FORBIDDEN");

    let res = client
        .post(srv.url("/api/v1/parts"))
        .bearer_auth("sk-unknown")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "UNAUTHORIZED");
}

#[tokio::test]
async fn rate_limit_rejects_with_retry_after() {
    let mut options = TestOptions::default();
    options.rate_limits.api.limit = 2;
    let srv = TestServer::spawn_with(options).await;
    let client = reqwest::Client::new();

    for expected_remaining in ["1", "0"] {
        let res = client
            .get(srv.url("/api/v1/parts"))
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.headers()["x-ratelimit-limit"], "2");
        assert_eq!(res.headers()["x-ratelimit-remaining"], expected_remaining);
    }

    let res = client
        .get(srv.url("/api/v1/parts"))
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
    assert!(res.headers().get("x-ratelimit-reset").is_some());
    assert_eq!(error_code(res).await, "RATE_LIMIT_EXCEEDED");

    // Other clients have their own bucket; non-API paths are never limited.
    let res = client
        .get(srv.url("/api/v1/parts"))
        .header("x-forwarded-for", "198.51.100.4")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let res = client
        .get(srv.url("/health"))
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn idle_session_times_out_and_is_deleted() {
    let srv = TestServer::spawn_with(TestOptions {
        session: SessionPolicy {
            lifetime: ChronoDuration::hours(24),
            idle_timeout: ChronoDuration::seconds(1),
        },
        ..TestOptions::default()
    })
    .await;
    let client = reqwest::Client::new();
    let alice = login(&client, &srv, "alice", PASSWORD).await;

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

    let res = client
        .get(srv.url("/api/v1/me"))
        .header("cookie", &alice.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "SESSION_TIMEOUT");

    let res = client
        .get(srv.url("/api/v1/me"))
        .header("cookie", &alice.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "UNAUTHORIZED");
}

#[tokio::test]
async fn deactivated_account_is_forbidden() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let bob = login(&client, &srv, "bob", PASSWORD).await;

    srv.services
        .stores
        .users
        .set_active(srv.bob.id, false)
        .await
        .unwrap();

    let res = client
        .get(srv.url("/api/v1/me"))
        .header("cookie", &bob.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "FORBIDDEN");

    let res = client
        .post(srv.url("/api/v1/auth/login"))
        .json(&json!({ "username": "bob", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rbac_enforces_grants_and_admin_only_paths() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let rita = login(&client, &srv, "rita", PASSWORD).await;
    let alice = login(&client, &srv, "alice", PASSWORD).await;

    let res = client
        .get(srv.url("/api/v1/parts/1"))
        .header("cookie", &rita.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .put(srv.url("/api/v1/parts/1"))
        .header("cookie", &rita.cookie)
        .header("x-csrf-token", &rita.csrf)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "FORBIDDEN");

    // Passthrough path: no grant needed.
    let res = client
        .get(srv.url("/api/v1/dashboard"))
        .header("cookie", &rita.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Admin-only segment, regardless of grants.
    let res = client
        .get(srv.url("/api/v1/users"))
        .header("cookie", &alice.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .put(srv.url("/api/v1/parts/1/approve"))
        .header("cookie", &alice.cookie)
        .header("x-csrf-token", &alice.csrf)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_replaces_role_grants() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let root = login(&client, &srv, "root", PASSWORD).await;
    let rita = login(&client, &srv, "rita", PASSWORD).await;
    let alice = login(&client, &srv, "alice", PASSWORD).await;

    let res = client
        .get(srv.url("/api/v1/roles"))
        .header("cookie", &alice.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .put(srv.url("/api/v1/roles/readonly/permissions"))
        .header("cookie", &root.cookie)
        .header("x-csrf-token", &root.csrf)
        .json(&json!({
            "permissions": [
                { "module": "parts", "action": "view" },
                { "module": "parts", "action": "edit" }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["permissions"].as_array().unwrap().len(), 2);

    let res = client
        .put(srv.url("/api/v1/parts/1"))
        .header("cookie", &rita.cookie)
        .header("x-csrf-token", &rita.csrf)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // The whole set was replaced: inventory view is gone.
    let res = client
        .get(srv.url("/api/v1/inventory"))
        .header("cookie", &rita.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn password_reset_round_trip_revokes_sessions() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let alice = login(&client, &srv, "alice", PASSWORD).await;

    for username in ["alice", "nobody"] {
        let res = client
            .post(srv.url("/api/v1/auth/password-reset/request"))
            .json(&json!({ "username": username }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }
    assert!(srv.reset_sink.latest_for("nobody").is_none());
    let token = srv.reset_sink.latest_for("alice").unwrap();

    let res = client
        .post(srv.url("/api/v1/auth/password-reset/confirm"))
        .json(&json!({ "token": token, "new_password": "short" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "WEAK_PASSWORD");

    let res = client
        .post(srv.url("/api/v1/auth/password-reset/confirm"))
        .json(&json!({ "token": token, "new_password": "Fresh-Battery-42" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Single use.
    let res = client
        .post(srv.url("/api/v1/auth/password-reset/confirm"))
        .json(&json!({ "token": token, "new_password": "Another-Battery-43" }))
        .send()
        .await
        .unwrap();
    assert_eq!(error_code(res).await, "INVALID_TOKEN");

    let res = client
        .get(srv.url("/api/v1/me"))
        .header("cookie", &alice.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    login(&client, &srv, "alice", "Fresh-Battery-42").await;
}

#[tokio::test]
async fn change_password_enforces_history() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let alice = login(&client, &srv, "alice", PASSWORD).await;

    let res = client
        .post(srv.url("/api/v1/account/password"))
        .header("cookie", &alice.cookie)
        .header("x-csrf-token", &alice.csrf)
        .json(&json!({ "current_password": PASSWORD, "new_password": "Second-Horse-10" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .post(srv.url("/api/v1/account/password"))
        .header("cookie", &alice.cookie)
        .header("x-csrf-token", &alice.csrf)
        .json(&json!({ "current_password": "Second-Horse-10", "new_password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "PASSWORD_REUSED");
}

#[tokio::test]
async fn logout_clears_the_session() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let alice = login(&client, &srv, "alice", PASSWORD).await;

    let res = client
        .post(srv.url("/api/v1/auth/logout"))
        .header("cookie", &alice.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(
        res.headers()["set-cookie"]
            .to_str()
            .unwrap()
            .starts_with("keystone_session=;")
    );

    let res = client
        .get(srv.url("/api/v1/me"))
        .header("cookie", &alice.cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn preflight_short_circuits_with_cors_headers() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .request(reqwest::Method::OPTIONS, srv.url("/api/v1/parts"))
        .header("origin", "https://app.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()["access-control-allow-origin"],
        "https://app.example.com"
    );
    assert_eq!(res.headers()["x-frame-options"], "DENY");

    let res = client
        .request(reqwest::Method::OPTIONS, srv.url("/api/v1/parts"))
        .header("origin", "https://evil.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("access-control-allow-origin").is_none());
}
