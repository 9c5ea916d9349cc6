//! `keystone-core`: shared building blocks for the security control plane.
//!
//! This crate contains **pure** primitives (no storage or HTTP concerns).

pub mod error;
pub mod id;
pub mod time;

pub use error::{DomainError, DomainResult};
pub use id::{ApiKeyId, UserId};
pub use time::{format_stored_timestamp, parse_stored_timestamp};
