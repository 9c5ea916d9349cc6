//! Error taxonomy for every security decision the control plane makes.

use thiserror::Error;

/// Failure reported by a storage collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found")]
    NotFound,
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Terminal outcome of an authentication, authorization or credential check.
///
/// Every variant maps to a stable machine code (see [`AuthError::code`]);
/// none of them are retried internally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("password does not meet strength requirements: {0}")]
    WeakPassword(String),

    #[error("password matches one of the recently used passwords")]
    PasswordReused,

    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("account is temporarily locked")]
    AccountLocked,

    #[error("session expired due to inactivity")]
    SessionTimeout,

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("CSRF token missing")]
    CsrfMissing,

    #[error("CSRF token invalid or expired")]
    CsrfInvalid,

    #[error("CSRF token does not belong to this session")]
    CsrfMismatch,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("unknown user")]
    UnknownUser,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    /// Stable machine-readable code carried in every error body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::WeakPassword(_) => "WEAK_PASSWORD",
            AuthError::PasswordReused => "PASSWORD_REUSED",
            AuthError::InvalidOrExpiredToken => "INVALID_TOKEN",
            AuthError::AccountLocked => "ACCOUNT_LOCKED",
            AuthError::SessionTimeout => "SESSION_TIMEOUT",
            AuthError::Unauthorized => "UNAUTHORIZED",
            AuthError::Forbidden(_) => "FORBIDDEN",
            AuthError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AuthError::CsrfMissing => "CSRF_TOKEN_MISSING",
            AuthError::CsrfInvalid => "CSRF_TOKEN_INVALID",
            AuthError::CsrfMismatch => "CSRF_TOKEN_MISMATCH",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::UnknownUser => "NOT_FOUND",
            AuthError::Store(_) | AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
