//! Persistence contracts consumed by the control plane.
//!
//! The control plane never caches user, session or token state (the only
//! in-memory projection is the [`crate::PermissionCache`] snapshot), so
//! correctness of compound updates depends on the adapter implementing
//! them atomically. Each trait documents which operations must be a single
//! atomic update.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keystone_core::UserId;

use crate::{PermissionEntry, Role, StoreError};

pub mod memory;

pub use memory::InMemoryAuthStore;

pub type StoreResult<T> = Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Stored user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    pub failed_login_attempts: u32,
    /// Raw stored lock-until text. Historical rows use several encodings;
    /// read it through [`keystone_core::parse_stored_timestamp`].
    pub locked_until: Option<String>,
}

/// Input for creating a user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
}

/// Stored browser session. Only the digest of the session token is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token_digest: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHistoryEntry {
    pub user_id: UserId,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Stored password-reset token. Only the digest of the token is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetTokenRecord {
    pub token_digest: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfTokenRecord {
    pub token: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Contracts
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>>;

    async fn find_by_id(&self, user_id: UserId) -> StoreResult<Option<UserRecord>>;

    /// Fails with [`StoreError::Conflict`] when the username is taken.
    async fn create_user(&self, user: NewUser) -> StoreResult<UserRecord>;

    async fn update_password_hash(&self, user_id: UserId, password_hash: &str) -> StoreResult<()>;

    async fn set_active(&self, user_id: UserId, active: bool) -> StoreResult<()>;

    /// Increment the failed-login counter and, when the new value reaches
    /// `threshold`, set lock-until to `lock_until`, as one atomic update.
    ///
    /// Returns the new counter, or `None` for an unknown username.
    async fn increment_failed_attempts(
        &self,
        username: &str,
        threshold: u32,
        lock_until: DateTime<Utc>,
    ) -> StoreResult<Option<u32>>;

    /// Reset the counter to zero and clear lock-until.
    async fn reset_failed_attempts(&self, username: &str) -> StoreResult<()>;

    /// Reset the counter and clear lock-until only if lock-until still holds
    /// `observed` (compare-and-clear). Returns whether a row was changed.
    async fn clear_stale_lock(&self, username: &str, observed: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: SessionRecord) -> StoreResult<()>;

    async fn find_session(&self, token_digest: &str) -> StoreResult<Option<SessionRecord>>;

    /// Stamp activity and push the expiry forward.
    async fn touch_session(
        &self,
        token_digest: &str,
        expires_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn delete_session(&self, token_digest: &str) -> StoreResult<()>;

    /// Returns the number of sessions removed.
    async fn delete_sessions_for_user(&self, user_id: UserId) -> StoreResult<u64>;
}

#[async_trait]
pub trait PasswordHistoryStore: Send + Sync {
    async fn append_history(&self, entry: PasswordHistoryEntry) -> StoreResult<()>;

    /// Most recent entries first, at most `limit`.
    async fn recent_history(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreResult<Vec<PasswordHistoryEntry>>;
}

#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    async fn insert_reset_token(&self, token: ResetTokenRecord) -> StoreResult<()>;

    async fn find_reset_token(&self, token_digest: &str) -> StoreResult<Option<ResetTokenRecord>>;

    /// Redeem a reset token: flip its single-use flag and store
    /// `password_hash` on the owning user, as one atomic step.
    ///
    /// Returns the owner, or `None` if the token is unknown, already used or
    /// expired at `now`. In that case nothing is written.
    async fn consume_reset_token(
        &self,
        token_digest: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserId>>;
}

#[async_trait]
pub trait CsrfTokenStore: Send + Sync {
    async fn insert_csrf_token(&self, token: CsrfTokenRecord) -> StoreResult<()>;

    async fn find_csrf_token(&self, token: &str) -> StoreResult<Option<CsrfTokenRecord>>;

    /// Drop tokens of `user_id` that expired at or before `now`.
    async fn delete_expired_csrf_tokens(&self, user_id: UserId, now: DateTime<Utc>)
    -> StoreResult<u64>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn count_grants(&self) -> StoreResult<u64>;

    async fn load_grants(&self) -> StoreResult<Vec<PermissionEntry>>;

    /// Replace every grant of `role` with `grants` in one transaction.
    async fn replace_role_grants(&self, role: &Role, grants: Vec<PermissionEntry>)
    -> StoreResult<()>;

    /// Insert grants, ignoring ones that already exist.
    async fn seed_grants(&self, grants: Vec<PermissionEntry>) -> StoreResult<()>;
}

/// Every store contract, as implemented by a single backend.
pub trait AuthStore:
    UserStore + SessionStore + PasswordHistoryStore + ResetTokenStore + CsrfTokenStore + PermissionStore
{
}

impl<T> AuthStore for T where
    T: UserStore
        + SessionStore
        + PasswordHistoryStore
        + ResetTokenStore
        + CsrfTokenStore
        + PermissionStore
{
}

/// Per-concern handles onto one backend, as consumed by the components.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub history: Arc<dyn PasswordHistoryStore>,
    pub reset_tokens: Arc<dyn ResetTokenStore>,
    pub csrf_tokens: Arc<dyn CsrfTokenStore>,
    pub permissions: Arc<dyn PermissionStore>,
}

impl Stores {
    pub fn from_backend<S: AuthStore + 'static>(backend: Arc<S>) -> Self {
        Self {
            users: backend.clone(),
            sessions: backend.clone(),
            history: backend.clone(),
            reset_tokens: backend.clone(),
            csrf_tokens: backend.clone(),
            permissions: backend,
        }
    }
}
