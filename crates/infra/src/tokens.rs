//! Opaque token generation from the operating system RNG.

use base64::Engine;
use rand::{RngCore, rngs::OsRng};

use keystone_auth::{AuthError, TokenGenerator};

const TOKEN_BYTES: usize = 32;

/// 256-bit tokens, URL-safe base64 without padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> Result<String, AuthError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| AuthError::Internal(format!("failed to generate token: {e}")))?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }
}
