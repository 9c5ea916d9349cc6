use serde::Serialize;

use keystone_auth::Role;
use keystone_core::{ApiKeyId, UserId};

/// How the caller proved its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthMethod {
    Session,
    Bearer { key_id: ApiKeyId, label: String },
}

/// Principal context for a request (authenticated identity + role).
///
/// Inserted by the authentication stage; absent on public paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: UserId,
    role: Role,
    method: AuthMethod,
}

impl PrincipalContext {
    pub fn new(user_id: UserId, role: Role, method: AuthMethod) -> Self {
        Self { user_id, role, method }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn method(&self) -> &AuthMethod {
        &self.method
    }

    pub fn is_bearer(&self) -> bool {
        matches!(self.method, AuthMethod::Bearer { .. })
    }
}
