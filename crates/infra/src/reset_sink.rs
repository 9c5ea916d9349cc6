//! Password-reset token delivery.
//!
//! No outbound channel is wired; the latest token per user is kept in memory
//! so operators (and tests) can retrieve it. The token value is never logged.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::info;

use keystone_auth::ResetTokenSink;
use keystone_core::UserId;

#[derive(Debug, Default)]
pub struct RecordingResetTokenSink {
    latest: Mutex<HashMap<String, String>>,
}

impl RecordingResetTokenSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently delivered token for `username`.
    pub fn latest_for(&self, username: &str) -> Option<String> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
            .cloned()
    }
}

impl ResetTokenSink for RecordingResetTokenSink {
    fn deliver(&self, username: &str, user_id: UserId, token: &str) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(username.to_string(), token.to_string());
        info!(user_id = %user_id, "password reset token ready for delivery");
    }
}
