//! `keystone-auth`: security control plane for the HTTP service.
//!
//! Password policy, account lockout, sessions, CSRF, rate limiting and
//! role-based authorization. Storage and entropy are injected through the
//! traits in [`store`] and [`capability`]; nothing here depends on HTTP.

pub mod authorize;
pub mod cache;
pub mod capability;
pub mod csrf;
pub mod error;
pub mod lockout;
pub mod password;
pub mod permissions;
pub mod rate_limit;
pub mod roles;
pub mod route;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use authorize::{Grant, authorize};
pub use cache::PermissionCache;
pub use capability::{
    BearerIdentity, BearerValidator, RejectAllBearer, ResetTokenSink, TokenGenerator, token_digest,
};
pub use csrf::{CSRF_HEADER, CsrfGuard, CsrfPolicy, requires_csrf};
pub use error::{AuthError, StoreError};
pub use lockout::{AccountLockout, LockoutPolicy};
pub use password::{PasswordPolicy, PasswordRules, hash_password, validate_strength, verify_password};
pub use permissions::{Action, Module, PermissionEntry, default_grants};
pub use rate_limit::{RateLimitRule, RateLimitStatus, RateLimiter, RateLimits, RouteClass};
pub use roles::Role;
pub use route::{RequiredPermission, api_relative_path, is_admin_only, required_permission};
pub use session::{
    ActiveSession, IssuedSession, SESSION_COOKIE_NAME, SessionManager, SessionPolicy,
    clear_session_cookie, extract_session_token, session_cookie,
};
pub use store::{InMemoryAuthStore, Stores};
