//! `pricewatch serve`: run the HTTP surface.

use crate::app::build_orchestrator;
use crate::http::{router, AppState};
use anyhow::{Context, Result};
use pricewatch::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Serve the HTTP API until ctrl-c.
pub async fn run(config: &Config, addr: SocketAddr) -> Result<()> {
    let orchestrator = build_orchestrator(config, false).await?;
    info!(
        %addr,
        storage = orchestrator.can_store(),
        "starting pricewatch v{}",
        env!("CARGO_PKG_VERSION")
    );

    let app = router(Arc::new(AppState { orchestrator }));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("HTTP server failed")
}
