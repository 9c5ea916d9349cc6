use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role tag attached to every user and bearer credential.
///
/// Roles are opaque strings; what a role may do is decided entirely by the
/// grant table held in the [`crate::PermissionCache`]. The three built-in
/// roles below are seeded when the grant table is empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const USER: Role = Role(Cow::Borrowed("user"));
    pub const READONLY: Role = Role(Cow::Borrowed("readonly"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.as_str() == Self::ADMIN.as_str()
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Self(Cow::Owned(value.to_string()))
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}
