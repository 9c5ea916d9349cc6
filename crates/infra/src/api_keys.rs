//! API keys configured at startup, validated as bearer credentials.
//!
//! Keys are supplied as `key:user_id:role` triples. Only digests of the key
//! material are retained once parsed.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use keystone_auth::{BearerIdentity, BearerValidator, Role, token_digest};
use keystone_core::{ApiKeyId, UserId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiKeyError {
    #[error("api key entry {index} must be key:user_id:role")]
    Malformed { index: usize },

    #[error("api key entry {index} has an invalid user id")]
    InvalidUserId { index: usize },

    #[error("api key entry {index} duplicates an earlier key")]
    Duplicate { index: usize },
}

#[derive(Debug, Default)]
pub struct ApiKeyValidator {
    by_digest: HashMap<String, BearerIdentity>,
}

impl ApiKeyValidator {
    /// Parse a comma-separated list of `key:user_id:role` entries.
    ///
    /// Blank entries are skipped.
    pub fn parse(entries: &str) -> Result<Self, ApiKeyError> {
        let mut by_digest = HashMap::new();

        for (index, entry) in entries
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .enumerate()
        {
            let mut parts = entry.splitn(3, ':');
            let (Some(key), Some(user), Some(role)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(ApiKeyError::Malformed { index });
            };
            if key.is_empty() || role.is_empty() {
                return Err(ApiKeyError::Malformed { index });
            }
            let user_id: UserId = user
                .parse()
                .map_err(|_| ApiKeyError::InvalidUserId { index })?;

            let identity = BearerIdentity {
                key_id: ApiKeyId::new(),
                user_id,
                role: Role::from(role.to_string()),
                label: format!("api-key-{}", index + 1),
            };
            if by_digest.insert(token_digest(key), identity).is_some() {
                return Err(ApiKeyError::Duplicate { index });
            }
        }

        Ok(Self { by_digest })
    }

    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }
}

#[async_trait]
impl BearerValidator for ApiKeyValidator {
    async fn validate(&self, token: &str) -> Option<BearerIdentity> {
        let identity = self.by_digest.get(&token_digest(token)).cloned();
        if identity.is_none() {
            debug!("unknown api key presented");
        }
        identity
    }
}
