//! Per-user CSRF tokens for state-changing requests.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, warn};

use keystone_core::UserId;

use crate::store::{CsrfTokenRecord, CsrfTokenStore, Stores};
use crate::{AuthError, TokenGenerator};

/// Request header carrying the token.
pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfPolicy {
    pub token_ttl: Duration,
}

impl Default for CsrfPolicy {
    fn default() -> Self {
        Self {
            token_ttl: Duration::hours(24),
        }
    }
}

/// Whether a request must carry a CSRF token.
///
/// Only state-changing methods on API paths, excluding the authentication
/// endpoints and bearer-authenticated (machine) callers.
pub fn requires_csrf(method: &str, path: &str, bearer_authenticated: bool) -> bool {
    if bearer_authenticated {
        return false;
    }
    if matches!(method.to_ascii_uppercase().as_str(), "GET" | "HEAD" | "OPTIONS") {
        return false;
    }
    if !path.starts_with("/api/") {
        return false;
    }
    !(path.starts_with("/api/v1/auth/") || path.starts_with("/api/auth/"))
}

#[derive(Clone)]
pub struct CsrfGuard {
    policy: CsrfPolicy,
    store: Arc<dyn CsrfTokenStore>,
    tokens: Arc<dyn TokenGenerator>,
}

impl CsrfGuard {
    pub fn new(policy: CsrfPolicy, stores: &Stores, tokens: Arc<dyn TokenGenerator>) -> Self {
        Self {
            policy,
            store: stores.csrf_tokens.clone(),
            tokens,
        }
    }

    /// Issue a token bound to `user_id`.
    ///
    /// The user's expired tokens are dropped first; a failure there is
    /// logged and does not block issuance.
    pub async fn issue_at(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<CsrfTokenRecord, AuthError> {
        match self.store.delete_expired_csrf_tokens(user_id, now).await {
            Ok(0) => {}
            Ok(removed) => debug!(user_id = %user_id, removed, "pruned expired CSRF tokens"),
            Err(err) => error!(user_id = %user_id, error = %err, "failed to prune expired CSRF tokens"),
        }

        let record = CsrfTokenRecord {
            token: self.tokens.generate()?,
            user_id,
            expires_at: now + self.policy.token_ttl,
        };
        self.store.insert_csrf_token(record.clone()).await?;
        Ok(record)
    }

    /// Validate the presented header value for `user_id`.
    pub async fn validate_at(
        &self,
        presented: Option<&str>,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let token = presented
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::CsrfMissing)?;

        let record = self
            .store
            .find_csrf_token(token)
            .await?
            .filter(|r| r.expires_at > now)
            .ok_or(AuthError::CsrfInvalid)?;

        if record.user_id != user_id {
            warn!(user_id = %user_id, owner = %record.user_id, "CSRF token presented by another user");
            return Err(AuthError::CsrfMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAuthStore;
    use crate::testing::SequenceTokens;

    fn guard() -> CsrfGuard {
        CsrfGuard::new(
            CsrfPolicy::default(),
            &Stores::from_backend(Arc::new(InMemoryAuthStore::new())),
            Arc::new(SequenceTokens::new("csrf")),
        )
    }

    #[test]
    fn only_mutating_api_requests_need_tokens() {
        assert!(requires_csrf("POST", "/api/v1/parts", false));
        assert!(requires_csrf("delete", "/api/v1/parts/1", false));
        assert!(!requires_csrf("GET", "/api/v1/parts", false));
        assert!(!requires_csrf("HEAD", "/api/v1/parts", false));
        assert!(!requires_csrf("OPTIONS", "/api/v1/parts", false));
        assert!(!requires_csrf("POST", "/api/v1/auth/login", false));
        assert!(!requires_csrf("POST", "/upload", false));
        assert!(!requires_csrf("POST", "/api/v1/parts", true));
    }

    #[tokio::test]
    async fn missing_invalid_mismatch_are_distinct() {
        let guard = guard();
        let now = Utc::now();
        let alice = UserId::new();
        let bob = UserId::new();
        let token = guard.issue_at(alice, now).await.unwrap();

        assert_eq!(guard.validate_at(None, alice, now).await, Err(AuthError::CsrfMissing));
        assert_eq!(guard.validate_at(Some("  "), alice, now).await, Err(AuthError::CsrfMissing));
        assert_eq!(
            guard.validate_at(Some("forged"), alice, now).await,
            Err(AuthError::CsrfInvalid)
        );
        assert_eq!(
            guard.validate_at(Some(&token.token), bob, now).await,
            Err(AuthError::CsrfMismatch)
        );
        assert_eq!(guard.validate_at(Some(&token.token), alice, now).await, Ok(()));
    }

    #[tokio::test]
    async fn issuing_prunes_the_users_expired_tokens() {
        let store = Arc::new(InMemoryAuthStore::new());
        let guard = CsrfGuard::new(
            CsrfPolicy::default(),
            &Stores::from_backend(store.clone()),
            Arc::new(SequenceTokens::new("csrf")),
        );
        let now = Utc::now();
        let alice = UserId::new();
        let bob = UserId::new();
        let stale = guard.issue_at(alice, now).await.unwrap();
        let bobs = guard.issue_at(bob, now).await.unwrap();

        let later = now + Duration::hours(25);
        let fresh = guard.issue_at(alice, later).await.unwrap();

        assert!(store.find_csrf_token(&stale.token).await.unwrap().is_none());
        assert!(store.find_csrf_token(&fresh.token).await.unwrap().is_some());
        // Other users' rows are left for their own next issuance.
        assert!(store.find_csrf_token(&bobs.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_token_is_invalid() {
        let guard = guard();
        let now = Utc::now();
        let alice = UserId::new();
        let token = guard.issue_at(alice, now).await.unwrap();
        let later = now + Duration::hours(25);
        assert_eq!(
            guard.validate_at(Some(&token.token), alice, later).await,
            Err(AuthError::CsrfInvalid)
        );
    }
}
