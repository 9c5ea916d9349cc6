//! Per-account failed-login counter with a time-boxed lock.
//!
//! ```text
//! Unlocked ──failed login──▶ Unlocked (counter+1)
//!     │                          │ counter ≥ threshold
//!     │                          ▼
//!     │                      Locked (lock-until = now + duration)
//!     │                          │ now > lock-until (observed by is_locked)
//!     ◀──────────────────────────┘ counter = 0, lock cleared
//! ```
//!
//! A successful login resets the counter and clears the lock from any state.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, warn};

use keystone_core::parse_stored_timestamp;

use crate::store::UserStore;
use crate::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub lock_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 10,
            lock_duration: Duration::minutes(15),
        }
    }
}

#[derive(Clone)]
pub struct AccountLockout {
    policy: LockoutPolicy,
    users: Arc<dyn UserStore>,
}

impl AccountLockout {
    pub fn new(policy: LockoutPolicy, users: Arc<dyn UserStore>) -> Self {
        Self { policy, users }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    pub async fn increment_failed_attempts(&self, username: &str) -> Result<Option<u32>, StoreError> {
        self.increment_failed_attempts_at(username, Utc::now()).await
    }

    /// Record a failed login. The increment and the conditional lock are one
    /// storage update, so concurrent failures cannot skip past the threshold.
    ///
    /// Returns the new counter (`None` for unknown usernames).
    pub async fn increment_failed_attempts_at(
        &self,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, StoreError> {
        let count = self
            .users
            .increment_failed_attempts(
                username,
                self.policy.max_failed_attempts,
                now + self.policy.lock_duration,
            )
            .await?;

        if let Some(count) = count {
            if count >= self.policy.max_failed_attempts {
                warn!(username, failed_attempts = count, "account locked after repeated failures");
            }
        }
        Ok(count)
    }

    /// Successful login: counter back to zero, lock cleared.
    pub async fn reset_failed_attempts(&self, username: &str) -> Result<(), StoreError> {
        self.users.reset_failed_attempts(username).await
    }

    pub async fn is_locked(&self, username: &str) -> Result<bool, StoreError> {
        self.is_locked_at(username, Utc::now()).await
    }

    /// Whether `username` is currently locked.
    ///
    /// A lapsed lock is cleared as a side effect (check-and-repair). An
    /// unparsable lock-until reads as unlocked: lockout is a secondary
    /// control and a corrupt row must not lock an account forever.
    pub async fn is_locked_at(&self, username: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let Some(user) = self.users.find_by_username(username).await? else {
            return Ok(false);
        };
        let Some(raw) = user.locked_until else {
            return Ok(false);
        };

        let Some(until) = parse_stored_timestamp(&raw) else {
            warn!(username, "unparsable lock-until value; treating account as unlocked");
            return Ok(false);
        };

        if until > now {
            return Ok(true);
        }

        if let Err(e) = self.users.clear_stale_lock(username, &raw).await {
            error!(username, "failed to clear lapsed lock: {e}");
        }
        Ok(false)
    }
}
