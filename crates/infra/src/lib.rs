//! Infrastructure adapters for the security control plane.
//!
//! Postgres persistence, OS-backed token entropy, configured API keys and the
//! password-reset delivery sink.

pub mod api_keys;
pub mod postgres;
pub mod reset_sink;
pub mod tokens;

pub use api_keys::{ApiKeyError, ApiKeyValidator};
pub use postgres::PostgresAuthStore;
pub use reset_sink::RecordingResetTokenSink;
pub use tokens::RandomTokenGenerator;
