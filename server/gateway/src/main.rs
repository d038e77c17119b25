mod config;
mod metrics;
mod state;
mod voice_relay;
mod ws;

use std::net::SocketAddr;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use bken_metrics::{MetricsConfig, MetricsServer};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::parse();
    let addr: SocketAddr = cfg.listen.parse()?;

    let metrics_server = MetricsServer::install(MetricsConfig { listen: cfg.metrics_listen.clone(), namespace: metrics::NAMESPACE })?;
    tokio::spawn(async move {
        if let Err(e) = metrics_server.serve().await {
            tracing::warn!(error = %e, "metrics server exited");
        }
    });
    let state = AppState::new(cfg.outbound_queue_size);

    let app = Router::new().route("/ws", get(ws::ws_upgrade)).with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        r = server => r?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown");
        }
    }

    Ok(())
}
