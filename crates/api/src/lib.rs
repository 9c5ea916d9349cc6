//! HTTP surface of the security control plane.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
