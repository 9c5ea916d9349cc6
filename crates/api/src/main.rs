use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use keystone_api::app::{build_app, services};
use keystone_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keystone_observability::init();

    let config = ApiConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(services::build_services(&config).await?);

    let _sweeper = services::spawn_rate_limit_sweeper(
        services.rate_limiter.clone(),
        services.rate_limits,
        config.rate_limit_sweep_interval,
    );

    let app = build_app(services, axum::Router::new());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
