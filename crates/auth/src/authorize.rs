//! Role-based authorization decision for one API request.

use serde::Serialize;
use tracing::warn;

use crate::route::{RequiredPermission, is_admin_only, required_permission};
use crate::{AuthError, PermissionCache, Role};

/// Why a request was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grant {
    /// Utility path; no grant required.
    Passthrough,
    /// The role holds the required grant.
    Granted(RequiredPermission),
}

/// Decide whether `role` may call `method api_path`.
///
/// The admin-only path override is evaluated first and independently of the
/// grant table; the table decides everything else.
pub fn authorize(
    cache: &PermissionCache,
    role: &Role,
    api_path: &str,
    method: &str,
) -> Result<Grant, AuthError> {
    if is_admin_only(api_path) && !role.is_admin() {
        warn!(role = %role, path = api_path, "admin-only path denied");
        return Err(AuthError::forbidden("administrator access required"));
    }

    let Some(required) = required_permission(api_path, method) else {
        return Ok(Grant::Passthrough);
    };

    if cache.has_permission(role.as_str(), required.module, required.action) {
        Ok(Grant::Granted(required))
    } else {
        warn!(
            role = %role,
            module = %required.module,
            action = %required.action,
            "permission denied"
        );
        Err(AuthError::forbidden(format!(
            "missing permission {}:{}",
            required.module, required.action
        )))
    }
}
