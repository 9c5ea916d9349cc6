//! Session issuance, validation, sliding renewal and cookie lifecycle.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use keystone_core::UserId;

use crate::store::{SessionRecord, SessionStore, Stores, UserRecord, UserStore};
use crate::{AuthError, TokenGenerator, token_digest};

/// Name of the session cookie.
pub const SESSION_COOKIE_NAME: &str = "keystone_session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Sliding lifetime; each authenticated request pushes expiry to now + lifetime.
    pub lifetime: Duration,
    /// Maximum gap between requests before the session is destroyed.
    pub idle_timeout: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            lifetime: Duration::hours(24),
            idle_timeout: Duration::minutes(30),
        }
    }
}

/// A newly created session. `token` is the raw cookie value.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub record: SessionRecord,
}

/// A session that passed validation, with its owning user.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub token_digest: String,
    pub user: UserRecord,
    pub record: SessionRecord,
}

#[derive(Clone)]
pub struct SessionManager {
    policy: SessionPolicy,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn TokenGenerator>,
}

impl SessionManager {
    pub fn new(policy: SessionPolicy, stores: &Stores, tokens: Arc<dyn TokenGenerator>) -> Self {
        Self {
            policy,
            sessions: stores.sessions.clone(),
            users: stores.users.clone(),
            tokens,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Start a session for `user_id` (called after a successful login).
    pub async fn create_session_at(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, AuthError> {
        let token = self.tokens.generate()?;
        let record = SessionRecord {
            token_digest: token_digest(&token),
            user_id,
            created_at: now,
            expires_at: now + self.policy.lifetime,
            last_activity: now,
        };
        self.sessions.insert_session(record.clone()).await?;
        info!(user_id = %user_id, "session created");
        Ok(IssuedSession { token, record })
    }

    /// Check a presented session token without renewing it.
    ///
    /// Fails with `Unauthorized` for unknown or expired sessions and unknown
    /// users, `SessionTimeout` once the inactivity window has elapsed (the
    /// session is deleted first), and `Forbidden` for deactivated accounts.
    pub async fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<ActiveSession, AuthError> {
        let digest = token_digest(token);
        let record = self
            .sessions
            .find_session(&digest)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if record.expires_at <= now {
            self.discard(&digest).await;
            return Err(AuthError::Unauthorized);
        }

        if self.expire_if_idle_at(&record, now).await {
            warn!(user_id = %record.user_id, "session timed out after inactivity");
            return Err(AuthError::SessionTimeout);
        }

        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !user.active {
            return Err(AuthError::forbidden("account is deactivated"));
        }

        Ok(ActiveSession {
            token_digest: digest,
            user,
            record,
        })
    }

    /// Delete `record` if its inactivity window has elapsed at `now`.
    ///
    /// Returns whether the session was expired.
    pub async fn expire_if_idle_at(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        if now - record.last_activity > self.policy.idle_timeout {
            self.discard(&record.token_digest).await;
            true
        } else {
            false
        }
    }

    /// Slide the expiry to `now + lifetime` and stamp activity.
    ///
    /// Storage failures are logged, not returned: the request already
    /// authenticated. Returns the new expiry for the reissued cookie.
    pub async fn renew_at(&self, session: &ActiveSession, now: DateTime<Utc>) -> DateTime<Utc> {
        let expires_at = now + self.policy.lifetime;
        if let Err(e) = self
            .sessions
            .touch_session(&session.token_digest, expires_at, now)
            .await
        {
            error!(user_id = %session.user.id, "failed to renew session: {e}");
        }
        expires_at
    }

    /// Resolve a token to its user id without renewal or timeout side effects.
    pub async fn lookup_user_at(&self, token: &str, now: DateTime<Utc>) -> Result<Option<UserId>, AuthError> {
        let record = self.sessions.find_session(&token_digest(token)).await?;
        Ok(record
            .filter(|r| r.expires_at > now && now - r.last_activity <= self.policy.idle_timeout)
            .map(|r| r.user_id))
    }

    /// Logout.
    pub async fn destroy(&self, token: &str) -> Result<(), AuthError> {
        self.sessions.delete_session(&token_digest(token)).await?;
        Ok(())
    }

    /// Revoke every session of a user (after a password reset).
    pub async fn revoke_all(&self, user_id: UserId) -> Result<u64, AuthError> {
        let removed = self.sessions.delete_sessions_for_user(user_id).await?;
        if removed > 0 {
            info!(user_id = %user_id, removed, "revoked sessions");
        }
        Ok(removed)
    }

    async fn discard(&self, digest: &str) {
        if let Err(e) = self.sessions.delete_session(digest).await {
            error!("failed to delete session: {e}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cookies
// ─────────────────────────────────────────────────────────────────────────────

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `Set-Cookie` value carrying `token` until `expires_at`.
pub fn session_cookie(token: &str, expires_at: DateTime<Utc>) -> String {
    format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; Expires={}; HttpOnly; Secure; SameSite=Lax",
        http_date(expires_at)
    )
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie() -> String {
    format!(
        "{SESSION_COOKIE_NAME}=; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; HttpOnly; Secure; SameSite=Lax"
    )
}

/// Find the session token in a `Cookie` request header value.
pub fn extract_session_token(cookie_header: &str) -> Option<&str> {
    cookie_header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name.trim() == SESSION_COOKIE_NAME && !value.trim().is_empty()).then(|| value.trim())
    })
}
