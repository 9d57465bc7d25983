//! # Scrape MCP Gateway
//!
//! A multi-version, session-routed MCP gateway. One process serves two
//! incompatible tool generations (`v1`, `v2`) over two transport styles:
//! long-lived HTTP+SSE streams and session-oriented Streamable HTTP.
//!
//! ## Routes
//! - `GET|HEAD /{apiKey}/[v2/]sse`: open an SSE session, or probe liveness
//! - `POST /{apiKey}/[v2/]messages?sessionId=...`: deliver to an SSE session
//! - `ALL /{apiKey}/{v1|v2}/mcp`: Streamable HTTP
//! - `GET /health`
//!
//! ## Components
//! - [`SessionRegistry`]: composite key (API key + session id) to transport
//! - [`SseConnectionManager`] and [`StreamableHttpSessionManager`]
//! - [`VersionRouter`]: one backend per version, never crossed
//! - [`FallbackResolver`]: single-candidate recovery on the v1 SSE path
//! - [`Lifecycle`]: close tracking, idle expiry, shutdown

pub mod backend;
mod connection;
pub mod cors;
pub mod fallback;
pub mod gateway;
pub mod identity;
pub mod lifecycle;
pub mod registry;
pub mod response;
pub mod router;
pub mod routes;
pub mod server;
pub mod session_manager;
pub mod sse_manager;
pub mod transport;
pub mod version;

pub use backend::{McpBackend, McpServer};
pub use cors::CorsLayer;
pub use fallback::{FallbackResolver, Resolution};
pub use gateway::Gateway;
pub use identity::{CompositeKey, SessionIdSource, extract_session_id};
pub use lifecycle::{Lifecycle, ShutdownReport};
pub use registry::{RegistryStats, SessionEntry, SessionRegistry};
pub use response::GatewayBody;
pub use router::VersionRouter;
pub use server::{GatewayServer, GatewayServerBuilder, ServerConfig};
pub use session_manager::{McpRequest, StreamableHttpSessionManager};
pub use sse_manager::SseConnectionManager;
pub use transport::{
    SseTransport, StreamableHttpTransport, Transport, TransportError, TransportHandle,
    TransportKind,
};
pub use version::ApiVersion;

// Re-export foundational types
pub use scrape_mcp_json_rpc::{JsonRpcDispatcher, JsonRpcHandler, JsonRpcMessage, SessionContext};

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway errors. Request handling never produces these; they come from
/// construction and from binding the listener.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("No backend configured for {0}")]
    MissingBackend(ApiVersion),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
