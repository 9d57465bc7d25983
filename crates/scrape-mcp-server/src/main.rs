//! `scrape-mcp`: multi-version MCP gateway for web scraping tools

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scrape_mcp_gateway::Lifecycle;
use scrape_mcp_server::{FirecrawlClient, GatewayConfig, build_server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Upper bound on one call to the scraping service
const SCRAPE_API_TIMEOUT: Duration = Duration::from_secs(300);

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

fn spawn_shutdown_handler(lifecycle: Lifecycle) {
    tokio::spawn(async move {
        shutdown_signal().await;
        let report = lifecycle.shutdown();
        info!(
            "Closed {} session(s), {} failed (v1 sse {}, v1 mcp {}, v2 sse {}, v2 mcp {})",
            report.closed,
            report.failed,
            report.stats.v1_sse,
            report.stats.v1_streamable_http,
            report.stats.v2_sse,
            report.stats.v2_streamable_http
        );
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::parse();
    let server_config = config.server_config()?;
    let api_url = config.api_url()?;
    info!("Scraping service: {}", api_url);

    let api = FirecrawlClient::new(api_url, SCRAPE_API_TIMEOUT)
        .context("Failed to create scraping service client")?;
    let server = build_server(server_config, Arc::new(api))?;

    spawn_shutdown_handler(server.lifecycle());

    if let Err(err) = server.run().await {
        error!("Gateway server failed: {}", err);
        return Err(err.into());
    }
    info!("Shutdown complete");
    Ok(())
}
