//! Capabilities injected into the control plane at construction time.
//!
//! Entropy, machine-credential lookup and reset-token delivery are external
//! collaborators; the components only see these traits.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use keystone_core::{ApiKeyId, UserId};

use crate::{AuthError, Role};

/// Source of unguessable opaque tokens (sessions, CSRF, password reset).
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> Result<String, AuthError>;
}

/// Identity behind a valid bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BearerIdentity {
    pub key_id: ApiKeyId,
    pub user_id: UserId,
    pub role: Role,
    pub label: String,
}

/// Validates long-lived machine credentials presented as `Authorization: Bearer`.
#[async_trait]
pub trait BearerValidator: Send + Sync {
    /// `None` means the credential is unknown or revoked.
    async fn validate(&self, token: &str) -> Option<BearerIdentity>;
}

/// Validator that accepts nothing; used when no API keys are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAllBearer;

#[async_trait]
impl BearerValidator for RejectAllBearer {
    async fn validate(&self, _token: &str) -> Option<BearerIdentity> {
        None
    }
}

/// Hands a freshly issued password-reset token to its delivery channel.
pub trait ResetTokenSink: Send + Sync {
    fn deliver(&self, username: &str, user_id: UserId, token: &str);
}

/// Digest under which secret tokens are persisted.
///
/// Raw session and reset tokens never reach storage; lookups hash the
/// presented value and compare digests.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
