//! ingest-gateway：中继网关入口
//!
//! 启动: cargo run --bin ingest-gateway [config.toml]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use ingest_relay::config::load_config;
use ingest_relay::core::ShutdownManager;
use ingest_relay::gateway::{build_router, GatewayState};
use ingest_relay::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config = load_config(std::env::args().nth(1).map(PathBuf::from))
        .context("Failed to load config")?;
    let state = GatewayState::from_config(&config).context("Failed to build upstream client")?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.gateway.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.gateway.listen_addr))?;
    tracing::info!(
        "Relay gateway listening on {} (upstream {})",
        config.gateway.listen_addr,
        config.gateway.upstream_base_url
    );

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let waiter = Arc::clone(&shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { waiter.wait_for_shutdown().await })
        .await
        .context("Gateway server failed")?;

    tracing::info!("Relay gateway stopped");
    Ok(())
}
