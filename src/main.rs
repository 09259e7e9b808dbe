use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;

use feedforge::orchestrator::SWEEP_INTERVAL;
use feedforge::{server, Config, FeedService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();
    config.validate().context("invalid configuration")?;

    let port = config.port;
    let production = config.production;
    let service = FeedService::from_config(config)
        .map_err(|e| anyhow::anyhow!("failed to build feed service: {e}"))?;

    // Proactive eviction of expired cache entries
    let sweeper = service.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweeper.sweep();
        }
    });

    let app = server::router(service);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(addr = %addr, production = production, "feedforge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("feedforge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
