use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keystone_auth::store::UserRecord;
use keystone_auth::{Action, Module, PermissionEntry};
use keystone_core::UserId;

use crate::context::AuthMethod;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GrantDto {
    pub module: Module,
    pub action: Action,
}

#[derive(Debug, Deserialize)]
pub struct SetRolePermissionsRequest {
    pub permissions: Vec<GrantDto>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub role: String,
}

impl From<&UserRecord> for UserSummary {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserSummary,
    pub csrf_token: String,
    pub session_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct WhoAmIResponse {
    pub user_id: UserId,
    pub role: String,
    pub auth: AuthMethod,
    pub permissions: Vec<GrantDto>,
}

#[derive(Debug, Serialize)]
pub struct RolePermissionsResponse {
    pub role: String,
    pub permissions: Vec<GrantDto>,
}

pub fn grants_to_dto(entries: &[PermissionEntry]) -> Vec<GrantDto> {
    entries
        .iter()
        .map(|e| GrantDto {
            module: e.module,
            action: e.action,
        })
        .collect()
}
