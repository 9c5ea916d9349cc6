//! Password strength, hashing, history and reset-token lifecycle.

use std::sync::{Arc, OnceLock};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use keystone_core::UserId;

use crate::store::{
    NewUser, PasswordHistoryEntry, PasswordHistoryStore, ResetTokenRecord, ResetTokenStore, Stores,
    UserRecord, UserStore,
};
use crate::{AuthError, Role, TokenGenerator, token_digest};

/// Characters counted toward the "special" category.
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Tunable password rules. `Default` carries the production values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRules {
    pub min_length: usize,
    /// How many of {upper, lower, digit, special} must be present.
    pub min_categories: usize,
    /// How many previous hashes a new password is compared against.
    pub history_depth: usize,
    pub reset_token_ttl: Duration,
}

impl Default for PasswordRules {
    fn default() -> Self {
        Self {
            min_length: 12,
            min_categories: 3,
            history_depth: 5,
            reset_token_ttl: Duration::hours(1),
        }
    }
}

impl PasswordRules {
    /// Length and character-category gates; both must pass.
    pub fn validate_strength(&self, password: &str) -> Result<(), AuthError> {
        if password.chars().count() < self.min_length {
            return Err(AuthError::WeakPassword(format!(
                "must be at least {} characters long",
                self.min_length
            )));
        }

        let categories = [
            password.chars().any(|c| c.is_ascii_uppercase()),
            password.chars().any(|c| c.is_ascii_lowercase()),
            password.chars().any(|c| c.is_ascii_digit()),
            password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)),
        ];
        let present = categories.iter().filter(|p| **p).count();
        if present < self.min_categories {
            return Err(AuthError::WeakPassword(format!(
                "must contain at least {} of: uppercase letter, lowercase letter, digit, special character",
                self.min_categories
            )));
        }

        Ok(())
    }
}

/// Strength check with the production rules.
pub fn validate_strength(password: &str) -> Result<(), AuthError> {
    PasswordRules::default().validate_strength(password)
}

// ─────────────────────────────────────────────────────────────────────────────
// Hashing
// ─────────────────────────────────────────────────────────────────────────────

/// Hash a password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
}

/// Constant-time comparison of `password` against a stored PHC hash.
///
/// Malformed stored hashes never match.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("stored password hash is malformed: {e}");
            false
        }
    }
}

async fn hash_off_thread(password: &str) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
}

async fn verify_off_thread(password: &str, hashes: Vec<String>) -> Result<bool, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hashes.iter().any(|h| verify_password(&password, h)))
        .await
        .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))
}

/// Hash compared against when the username does not exist, so unknown users
/// cost the same as wrong passwords.
fn decoy_hash() -> Option<&'static str> {
    static DECOY: OnceLock<Option<String>> = OnceLock::new();
    DECOY
        .get_or_init(|| hash_password("keystone-decoy-credential").ok())
        .as_deref()
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy over persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Credential lifecycle: strength, history, reset tokens and password changes.
#[derive(Clone)]
pub struct PasswordPolicy {
    rules: PasswordRules,
    users: Arc<dyn UserStore>,
    history: Arc<dyn PasswordHistoryStore>,
    reset_tokens: Arc<dyn ResetTokenStore>,
}

impl PasswordPolicy {
    pub fn new(rules: PasswordRules, stores: &Stores) -> Self {
        Self {
            rules,
            users: stores.users.clone(),
            history: stores.history.clone(),
            reset_tokens: stores.reset_tokens.clone(),
        }
    }

    pub fn rules(&self) -> &PasswordRules {
        &self.rules
    }

    pub fn validate_strength(&self, password: &str) -> Result<(), AuthError> {
        self.rules.validate_strength(password)
    }

    /// Reject `candidate` if it matches any of the user's most recent hashes.
    ///
    /// Only consulted on password changes and resets, never on login.
    pub async fn check_history(&self, user_id: UserId, candidate: &str) -> Result<(), AuthError> {
        let recent = self
            .history
            .recent_history(user_id, self.rules.history_depth)
            .await?;
        let hashes = recent.into_iter().map(|e| e.password_hash).collect();
        if verify_off_thread(candidate, hashes).await? {
            return Err(AuthError::PasswordReused);
        }
        Ok(())
    }

    /// Resolve the user behind a login attempt.
    ///
    /// Returns `None` for an unknown username or a wrong password; both take
    /// one hash verification.
    pub async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserRecord>, AuthError> {
        let user = self.users.find_by_username(username).await?;
        let hash = match &user {
            Some(u) => u.password_hash.clone(),
            None => decoy_hash().unwrap_or_default().to_string(),
        };
        let matches = verify_off_thread(password, vec![hash]).await?;
        Ok(user.filter(|_| matches))
    }

    pub async fn generate_reset_token(
        &self,
        username: &str,
        generator: &dyn TokenGenerator,
    ) -> Result<(UserId, String), AuthError> {
        self.generate_reset_token_at(username, generator, Utc::now())
            .await
    }

    /// Issue a single-use reset token for `username`.
    ///
    /// Returns the owning user id with the raw token; only its digest is stored.
    pub async fn generate_reset_token_at(
        &self,
        username: &str,
        generator: &dyn TokenGenerator,
        now: DateTime<Utc>,
    ) -> Result<(UserId, String), AuthError> {
        let user = self
            .users
            .find_by_username(username)
            .await?
            .ok_or(AuthError::UnknownUser)?;

        let token = generator.generate()?;
        self.reset_tokens
            .insert_reset_token(ResetTokenRecord {
                token_digest: token_digest(&token),
                user_id: user.id,
                created_at: now,
                expires_at: now + self.rules.reset_token_ttl,
                used: false,
            })
            .await?;

        info!(user_id = %user.id, "password reset token issued");
        Ok((user.id, token))
    }

    pub async fn validate_reset_token(&self, token: &str) -> Result<Option<UserId>, AuthError> {
        self.validate_reset_token_at(token, Utc::now()).await
    }

    /// `Some(user)` iff an unused, unexpired token exists.
    ///
    /// Unknown, expired and consumed tokens are indistinguishable to callers.
    pub async fn validate_reset_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, AuthError> {
        let record = self.reset_tokens.find_reset_token(&token_digest(token)).await?;
        Ok(record
            .filter(|r| !r.used && r.expires_at > now)
            .map(|r| r.user_id))
    }

    pub async fn reset_with_token(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<UserId, AuthError> {
        self.reset_with_token_at(token, new_password, Utc::now()).await
    }

    /// Validate → strength → history → hash → redeem → history.
    ///
    /// Any failure before redemption leaves the token usable, so the caller
    /// can retry with a corrected password until it expires. Redemption
    /// marks the token used and stores the new hash in one store operation;
    /// of two concurrent requests with the same token only one succeeds.
    pub async fn reset_with_token_at(
        &self,
        token: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<UserId, AuthError> {
        let user_id = self
            .validate_reset_token_at(token, now)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        self.validate_strength(new_password)?;
        self.check_history(user_id, new_password).await?;

        let hash = hash_off_thread(new_password).await?;
        let redeemed = self
            .reset_tokens
            .consume_reset_token(&token_digest(token), &hash, now)
            .await?;
        if redeemed.is_none() {
            warn!(user_id = %user_id, "reset token was redeemed concurrently");
            return Err(AuthError::InvalidOrExpiredToken);
        }

        self.history
            .append_history(PasswordHistoryEntry {
                user_id,
                password_hash: hash,
                created_at: now,
            })
            .await?;

        info!(user_id = %user_id, "password reset completed");
        Ok(user_id)
    }

    pub async fn change_password(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.change_password_at(user_id, current_password, new_password, Utc::now())
            .await
    }

    /// Change a password after re-verifying the current one.
    pub async fn change_password_at(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !verify_off_thread(current_password, vec![user.password_hash]).await? {
            return Err(AuthError::InvalidCredentials);
        }

        self.validate_strength(new_password)?;
        self.check_history(user_id, new_password).await?;

        let hash = hash_off_thread(new_password).await?;
        self.users.update_password_hash(user_id, &hash).await?;
        self.history
            .append_history(PasswordHistoryEntry {
                user_id,
                password_hash: hash,
                created_at: now,
            })
            .await?;
        Ok(())
    }

    /// Create an account with a strength-checked password and seed its history.
    pub async fn create_user_at(
        &self,
        username: &str,
        password: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<UserRecord, AuthError> {
        self.validate_strength(password)?;
        let hash = hash_off_thread(password).await?;
        let user = self
            .users
            .create_user(NewUser {
                username: username.to_string(),
                password_hash: hash.clone(),
                role,
                active: true,
            })
            .await?;
        self.history
            .append_history(PasswordHistoryEntry {
                user_id: user.id,
                password_hash: hash,
                created_at: now,
            })
            .await?;
        Ok(user)
    }
}
