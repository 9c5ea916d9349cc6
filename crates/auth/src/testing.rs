//! Deterministic collaborators for unit tests.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{AuthError, TokenGenerator};

/// Yields `<prefix>-1`, `<prefix>-2`, ...
pub(crate) struct SequenceTokens {
    prefix: &'static str,
    next: AtomicU64,
}

impl SequenceTokens {
    pub(crate) fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            next: AtomicU64::new(1),
        }
    }
}

impl TokenGenerator for SequenceTokens {
    fn generate(&self) -> Result<String, AuthError> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(format!("{}-{n}", self.prefix))
    }
}
