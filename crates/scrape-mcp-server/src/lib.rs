//! # Scrape MCP Server
//!
//! The tool layer behind the gateway: one MCP server per API generation,
//! each forwarding tool calls to the scraping service, plus the
//! configuration the `scrape-mcp` binary is started with.

pub mod config;
pub mod mcp;
pub mod scrape_api;
pub mod tools;

use std::sync::Arc;

use scrape_mcp_gateway::{ApiVersion, GatewayServer, ServerConfig};

pub use config::{ConfigError, GatewayConfig};
pub use mcp::{McpError, ScrapeMcpHandler};
pub use scrape_api::{ApiAuth, FirecrawlClient, ScrapeApi, ScrapeError};

/// Assemble the gateway with a v1 and a v2 server sharing one API client
pub fn build_server(
    config: ServerConfig,
    api: Arc<dyn ScrapeApi>,
) -> scrape_mcp_gateway::Result<GatewayServer> {
    GatewayServer::builder()
        .config(config)
        .backend(mcp::backend(ApiVersion::V1, Arc::clone(&api)))
        .backend(mcp::backend(ApiVersion::V2, api))
        .build()
}
