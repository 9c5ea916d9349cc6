//! In-memory backend for tests and single-process development.
//!
//! All state sits behind one `RwLock`, so every compound operation
//! (increment-and-lock, compare-and-clear, replace-role-grants) is atomic
//! with respect to every other operation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use keystone_core::{UserId, format_stored_timestamp};

use super::{
    CsrfTokenRecord, CsrfTokenStore, NewUser, PasswordHistoryEntry, PasswordHistoryStore,
    PermissionStore, ResetTokenRecord, ResetTokenStore, SessionRecord, SessionStore, StoreResult,
    UserRecord, UserStore,
};
use crate::{PermissionEntry, Role, StoreError};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, UserRecord>,
    sessions: HashMap<String, SessionRecord>,
    history: Vec<PasswordHistoryEntry>,
    reset_tokens: HashMap<String, ResetTokenRecord>,
    csrf_tokens: HashMap<String, CsrfTokenRecord>,
    grants: BTreeSet<PermissionEntry>,
}

impl State {
    fn user_by_name_mut(&mut self, username: &str) -> Option<&mut UserRecord> {
        self.users.values_mut().find(|u| u.username == username)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuthStore {
    inner: RwLock<State>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.inner
            .read()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.inner
            .write()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))
    }

    /// Overwrite the raw lock-until text of a user.
    ///
    /// Exists so tests can reproduce rows written in legacy encodings.
    pub fn set_raw_lock_until(&self, username: &str, raw: Option<&str>) -> StoreResult<()> {
        let mut state = self.write()?;
        let user = state.user_by_name_mut(username).ok_or(StoreError::NotFound)?;
        user.locked_until = raw.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryAuthStore {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        let state = self.read()?;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, user_id: UserId) -> StoreResult<Option<UserRecord>> {
        Ok(self.read()?.users.get(&user_id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<UserRecord> {
        let mut state = self.write()?;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!(
                "username '{}' already exists",
                user.username
            )));
        }
        let record = UserRecord {
            id: UserId::new(),
            username: user.username,
            password_hash: user.password_hash,
            role: user.role,
            active: user.active,
            failed_login_attempts: 0,
            locked_until: None,
        };
        state.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_password_hash(&self, user_id: UserId, password_hash: &str) -> StoreResult<()> {
        let mut state = self.write()?;
        let user = state.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn set_active(&self, user_id: UserId, active: bool) -> StoreResult<()> {
        let mut state = self.write()?;
        let user = state.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.active = active;
        Ok(())
    }

    async fn increment_failed_attempts(
        &self,
        username: &str,
        threshold: u32,
        lock_until: DateTime<Utc>,
    ) -> StoreResult<Option<u32>> {
        let mut state = self.write()?;
        let Some(user) = state.user_by_name_mut(username) else {
            return Ok(None);
        };
        user.failed_login_attempts = user.failed_login_attempts.saturating_add(1);
        if user.failed_login_attempts >= threshold {
            user.locked_until = Some(format_stored_timestamp(lock_until));
        }
        Ok(Some(user.failed_login_attempts))
    }

    async fn reset_failed_attempts(&self, username: &str) -> StoreResult<()> {
        let mut state = self.write()?;
        if let Some(user) = state.user_by_name_mut(username) {
            user.failed_login_attempts = 0;
            user.locked_until = None;
        }
        Ok(())
    }

    async fn clear_stale_lock(&self, username: &str, observed: &str) -> StoreResult<bool> {
        let mut state = self.write()?;
        match state.user_by_name_mut(username) {
            Some(user) if user.locked_until.as_deref() == Some(observed) => {
                user.failed_login_attempts = 0;
                user.locked_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl SessionStore for InMemoryAuthStore {
    async fn insert_session(&self, session: SessionRecord) -> StoreResult<()> {
        let mut state = self.write()?;
        state.sessions.insert(session.token_digest.clone(), session);
        Ok(())
    }

    async fn find_session(&self, token_digest: &str) -> StoreResult<Option<SessionRecord>> {
        Ok(self.read()?.sessions.get(token_digest).cloned())
    }

    async fn touch_session(
        &self,
        token_digest: &str,
        expires_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        let session = state
            .sessions
            .get_mut(token_digest)
            .ok_or(StoreError::NotFound)?;
        session.expires_at = expires_at;
        session.last_activity = last_activity;
        Ok(())
    }

    async fn delete_session(&self, token_digest: &str) -> StoreResult<()> {
        self.write()?.sessions.remove(token_digest);
        Ok(())
    }

    async fn delete_sessions_for_user(&self, user_id: UserId) -> StoreResult<u64> {
        let mut state = self.write()?;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - state.sessions.len()) as u64)
    }
}

#[async_trait]
impl PasswordHistoryStore for InMemoryAuthStore {
    async fn append_history(&self, entry: PasswordHistoryEntry) -> StoreResult<()> {
        self.write()?.history.push(entry);
        Ok(())
    }

    async fn recent_history(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreResult<Vec<PasswordHistoryEntry>> {
        let state = self.read()?;
        // Appends are chronological; walk backwards for newest-first.
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ResetTokenStore for InMemoryAuthStore {
    async fn insert_reset_token(&self, token: ResetTokenRecord) -> StoreResult<()> {
        let mut state = self.write()?;
        state.reset_tokens.insert(token.token_digest.clone(), token);
        Ok(())
    }

    async fn find_reset_token(&self, token_digest: &str) -> StoreResult<Option<ResetTokenRecord>> {
        Ok(self.read()?.reset_tokens.get(token_digest).cloned())
    }

    async fn consume_reset_token(
        &self,
        token_digest: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserId>> {
        let mut state = self.write()?;
        let user_id = match state.reset_tokens.get(token_digest) {
            Some(token) if !token.used && token.expires_at > now => token.user_id,
            _ => return Ok(None),
        };
        let user = state.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        if let Some(token) = state.reset_tokens.get_mut(token_digest) {
            token.used = true;
        }
        Ok(Some(user_id))
    }
}

#[async_trait]
impl CsrfTokenStore for InMemoryAuthStore {
    async fn insert_csrf_token(&self, token: CsrfTokenRecord) -> StoreResult<()> {
        let mut state = self.write()?;
        state.csrf_tokens.insert(token.token.clone(), token);
        Ok(())
    }

    async fn find_csrf_token(&self, token: &str) -> StoreResult<Option<CsrfTokenRecord>> {
        Ok(self.read()?.csrf_tokens.get(token).cloned())
    }

    async fn delete_expired_csrf_tokens(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.write()?;
        let before = state.csrf_tokens.len();
        state
            .csrf_tokens
            .retain(|_, t| t.user_id != user_id || t.expires_at > now);
        Ok((before - state.csrf_tokens.len()) as u64)
    }
}

#[async_trait]
impl PermissionStore for InMemoryAuthStore {
    async fn count_grants(&self) -> StoreResult<u64> {
        Ok(self.read()?.grants.len() as u64)
    }

    async fn load_grants(&self) -> StoreResult<Vec<PermissionEntry>> {
        Ok(self.read()?.grants.iter().cloned().collect())
    }

    async fn replace_role_grants(
        &self,
        role: &Role,
        grants: Vec<PermissionEntry>,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        state.grants.retain(|g| &g.role != role);
        state.grants.extend(grants);
        Ok(())
    }

    async fn seed_grants(&self, grants: Vec<PermissionEntry>) -> StoreResult<()> {
        self.write()?.grants.extend(grants);
        Ok(())
    }
}
