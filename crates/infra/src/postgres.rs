//! Postgres-backed implementation of every control-plane store contract.
//!
//! ## Atomicity
//!
//! - The failed-login increment and the conditional lock are one `UPDATE`.
//! - Clearing a lapsed lock is compare-and-clear on the observed text.
//! - Redeeming a reset token flips `used` with a guarded `UPDATE` and writes the
//!   new password hash in the same transaction, so a token is consumed once.
//! - Replacing a role's grants runs in a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use keystone_auth::store::{
    CsrfTokenRecord, CsrfTokenStore, NewUser, PasswordHistoryEntry, PasswordHistoryStore,
    PermissionStore, ResetTokenRecord, ResetTokenStore, SessionRecord, SessionStore, StoreResult,
    UserRecord, UserStore,
};
use keystone_auth::{PermissionEntry, Role, StoreError};
use keystone_core::{UserId, format_stored_timestamp};

const SCHEMA_SQL: &str = include_str!("../migrations/0001_auth.sql");

#[derive(Clone)]
pub struct PostgresAuthStore {
    pool: PgPool,
}

impl PostgresAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create missing tables. Every statement is idempotent.
    pub async fn apply_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        info!("auth schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

const USER_COLUMNS: &str =
    "id, username, password_hash, role, active, failed_login_attempts, locked_until";

#[async_trait]
impl UserStore for PostgresAuthStore {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_username", e))?;
        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_by_username", e))
    }

    async fn find_by_id(&self, user_id: UserId) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;
        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_by_id", e))
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<UserRecord> {
        let id = UserId::new();
        sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, role, active)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id.as_uuid())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_user", e))?;

        Ok(UserRecord {
            id,
            username: user.username,
            password_hash: user.password_hash,
            role: user.role,
            active: user.active,
            failed_login_attempts: 0,
            locked_until: None,
        })
    }

    async fn update_password_hash(&self, user_id: UserId, password_hash: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id.as_uuid())
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_password_hash", e))?;
        expect_one_row(result.rows_affected())
    }

    async fn set_active(&self, user_id: UserId, active: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET active = $2 WHERE id = $1")
            .bind(user_id.as_uuid())
            .bind(active)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_active", e))?;
        expect_one_row(result.rows_affected())
    }

    async fn increment_failed_attempts(
        &self,
        username: &str,
        threshold: u32,
        lock_until: DateTime<Utc>,
    ) -> StoreResult<Option<u32>> {
        let row = sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = failed_login_attempts + 1,
                locked_until = CASE
                    WHEN failed_login_attempts + 1 >= $2 THEN $3
                    ELSE locked_until
                END
            WHERE username = $1
            RETURNING failed_login_attempts
            "#,
        )
        .bind(username)
        .bind(i32::try_from(threshold).unwrap_or(i32::MAX))
        .bind(format_stored_timestamp(lock_until))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("increment_failed_attempts", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let count: i32 = row
            .try_get("failed_login_attempts")
            .map_err(|e| map_sqlx_error("increment_failed_attempts", e))?;
        Ok(Some(count.max(0) as u32))
    }

    async fn reset_failed_attempts(&self, username: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL WHERE username = $1",
        )
        .bind(username)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_failed_attempts", e))?;
        Ok(())
    }

    async fn clear_stale_lock(&self, username: &str, observed: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = 0, locked_until = NULL
            WHERE username = $1 AND locked_until = $2
            "#,
        )
        .bind(username)
        .bind(observed)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("clear_stale_lock", e))?;
        Ok(result.rows_affected() > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl SessionStore for PostgresAuthStore {
    async fn insert_session(&self, session: SessionRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token_digest, user_id, created_at, expires_at, last_activity)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&session.token_digest)
        .bind(session.user_id.as_uuid())
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.last_activity)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;
        Ok(())
    }

    async fn find_session(&self, token_digest: &str) -> StoreResult<Option<SessionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT token_digest, user_id, created_at, expires_at, last_activity
            FROM sessions
            WHERE token_digest = $1
            "#,
        )
        .bind(token_digest)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_session", e))?;

        row.map(|row| -> Result<SessionRecord, sqlx::Error> {
            Ok(SessionRecord {
                token_digest: row.try_get("token_digest")?,
                user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
                created_at: row.try_get("created_at")?,
                expires_at: row.try_get("expires_at")?,
                last_activity: row.try_get("last_activity")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("find_session", e))
    }

    async fn touch_session(
        &self,
        token_digest: &str,
        expires_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET expires_at = $2, last_activity = $3 WHERE token_digest = $1",
        )
        .bind(token_digest)
        .bind(expires_at)
        .bind(last_activity)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("touch_session", e))?;
        expect_one_row(result.rows_affected())
    }

    async fn delete_session(&self, token_digest: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token_digest = $1")
            .bind(token_digest)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_session", e))?;
        Ok(())
    }

    async fn delete_sessions_for_user(&self, user_id: UserId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_sessions_for_user", e))?;
        Ok(result.rows_affected())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Password history and reset tokens
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PasswordHistoryStore for PostgresAuthStore {
    async fn append_history(&self, entry: PasswordHistoryEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO password_history (user_id, password_hash, created_at) VALUES ($1, $2, $3)",
        )
        .bind(entry.user_id.as_uuid())
        .bind(&entry.password_hash)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_history", e))?;
        Ok(())
    }

    async fn recent_history(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> StoreResult<Vec<PasswordHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, password_hash, created_at
            FROM password_history
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("recent_history", e))?;

        rows.iter()
            .map(|row| -> Result<PasswordHistoryEntry, sqlx::Error> {
                Ok(PasswordHistoryEntry {
                    user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
                    password_hash: row.try_get("password_hash")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("recent_history", e))
    }
}

#[async_trait]
impl ResetTokenStore for PostgresAuthStore {
    async fn insert_reset_token(&self, token: ResetTokenRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (token_digest, user_id, created_at, expires_at, used)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&token.token_digest)
        .bind(token.user_id.as_uuid())
        .bind(token.created_at)
        .bind(token.expires_at)
        .bind(token.used)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_reset_token", e))?;
        Ok(())
    }

    async fn find_reset_token(&self, token_digest: &str) -> StoreResult<Option<ResetTokenRecord>> {
        let row = sqlx::query(
            r#"
            SELECT token_digest, user_id, created_at, expires_at, used
            FROM password_reset_tokens
            WHERE token_digest = $1
            "#,
        )
        .bind(token_digest)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_reset_token", e))?;

        row.map(|row| -> Result<ResetTokenRecord, sqlx::Error> {
            Ok(ResetTokenRecord {
                token_digest: row.try_get("token_digest")?,
                user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
                created_at: row.try_get("created_at")?,
                expires_at: row.try_get("expires_at")?,
                used: row.try_get("used")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("find_reset_token", e))
    }

    async fn consume_reset_token(
        &self,
        token_digest: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserId>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // The row lock taken here serializes concurrent redemptions.
        let owner: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE password_reset_tokens
            SET used = TRUE
            WHERE token_digest = $1 AND used = FALSE AND expires_at > $2
            RETURNING user_id
            "#,
        )
        .bind(token_digest)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("consume_reset_token", e))?;

        let Some(owner) = owner else {
            // Dropping `tx` rolls back.
            return Ok(None);
        };

        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(owner)
            .bind(password_hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("consume_reset_token", e))?;
        expect_one_row(result.rows_affected())?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(Some(UserId::from_uuid(owner)))
    }
}

#[async_trait]
impl CsrfTokenStore for PostgresAuthStore {
    async fn insert_csrf_token(&self, token: CsrfTokenRecord) -> StoreResult<()> {
        sqlx::query("INSERT INTO csrf_tokens (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&token.token)
            .bind(token.user_id.as_uuid())
            .bind(token.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_csrf_token", e))?;
        Ok(())
    }

    async fn find_csrf_token(&self, token: &str) -> StoreResult<Option<CsrfTokenRecord>> {
        let row = sqlx::query("SELECT token, user_id, expires_at FROM csrf_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_csrf_token", e))?;

        row.map(|row| -> Result<CsrfTokenRecord, sqlx::Error> {
            Ok(CsrfTokenRecord {
                token: row.try_get("token")?,
                user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
                expires_at: row.try_get("expires_at")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("find_csrf_token", e))
    }

    async fn delete_expired_csrf_tokens(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM csrf_tokens WHERE user_id = $1 AND expires_at <= $2")
            .bind(user_id.as_uuid())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_expired_csrf_tokens", e))?;
        Ok(result.rows_affected())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Role grants
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PermissionStore for PostgresAuthStore {
    async fn count_grants(&self) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS grants FROM permissions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_grants", e))?;
        let count: i64 = row
            .try_get("grants")
            .map_err(|e| map_sqlx_error("count_grants", e))?;
        Ok(count.max(0) as u64)
    }

    async fn load_grants(&self) -> StoreResult<Vec<PermissionEntry>> {
        let rows = sqlx::query("SELECT role, module, action FROM permissions")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_grants", e))?;

        let mut grants = Vec::with_capacity(rows.len());
        for row in &rows {
            let role: String = row.try_get("role").map_err(|e| map_sqlx_error("load_grants", e))?;
            let module: String = row
                .try_get("module")
                .map_err(|e| map_sqlx_error("load_grants", e))?;
            let action: String = row
                .try_get("action")
                .map_err(|e| map_sqlx_error("load_grants", e))?;

            // Rows naming retired modules or actions are skipped, not fatal.
            match (module.parse(), action.parse()) {
                (Ok(module), Ok(action)) => {
                    grants.push(PermissionEntry::new(Role::from(role), module, action))
                }
                _ => tracing::warn!(role, module, action, "skipping unrecognised grant row"),
            }
        }
        Ok(grants)
    }

    async fn replace_role_grants(&self, role: &Role, grants: Vec<PermissionEntry>) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("DELETE FROM permissions WHERE role = $1")
            .bind(role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_role_grants", e))?;

        for grant in &grants {
            sqlx::query("INSERT INTO permissions (role, module, action) VALUES ($1, $2, $3)")
                .bind(role.as_str())
                .bind(grant.module.as_str())
                .bind(grant.action.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("replace_role_grants", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn seed_grants(&self, grants: Vec<PermissionEntry>) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for grant in &grants {
            sqlx::query(
                r#"
                INSERT INTO permissions (role, module, action)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(grant.role.as_str())
            .bind(grant.module.as_str())
            .bind(grant.action.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("seed_grants", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn user_from_row(row: &PgRow) -> Result<UserRecord, sqlx::Error> {
    let attempts: i32 = row.try_get("failed_login_attempts")?;
    let role: String = row.try_get("role")?;
    Ok(UserRecord {
        id: UserId::from_uuid(row.try_get::<Uuid, _>("id")?),
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        role: Role::from(role),
        active: row.try_get("active")?,
        failed_login_attempts: attempts.max(0) as u32,
        locked_until: row.try_get("locked_until")?,
    })
}

fn expect_one_row(rows_affected: u64) -> StoreResult<()> {
    if rows_affected == 0 {
        Err(StoreError::NotFound)
    } else {
        Ok(())
    }
}

/// Map SQLx errors to [`StoreError`].
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
