//! HTTP application wiring (axum router + middleware chain).
//!
//! - `services.rs`: storage backend, policies and shared state
//! - `routes/`: control-plane handlers
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: the structured error response

use std::sync::Arc;

use axum::{Extension, Router, middleware::from_fn, middleware::from_fn_with_state, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router.
///
/// `business` carries the routes of the business layer; they only run once
/// a request has cleared every stage of the chain.
pub fn build_app(services: Arc<AppServices>, business: Router) -> Router {
    let chain = ServiceBuilder::new()
        .layer(from_fn(middleware::security_headers))
        .layer(from_fn_with_state(services.clone(), middleware::cors_and_logging))
        .layer(from_fn_with_state(services.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(services.clone(), middleware::authenticate))
        .layer(from_fn_with_state(services.clone(), middleware::csrf_protect))
        .layer(from_fn_with_state(services.clone(), middleware::authorize_request));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .merge(business)
        .fallback(routes::system::not_found)
        .layer(Extension(services))
        .layer(chain)
}

pub use services::AppServices;
