//! Version-specific MCP servers the gateway attaches to transports
//!
//! A backend is a long-lived, shared, read-mostly object. It holds no
//! per-session state; everything session-scoped lives in the transport and
//! the registry.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use scrape_mcp_json_rpc::{
    JsonRpcDispatcher, JsonRpcMessage, JsonRpcReply, SessionContext, ToJsonRpcError,
};

use crate::transport::{Transport, TransportError};
use crate::version::ApiVersion;

/// JSON-RPC method handling for one tool generation
#[async_trait]
pub trait McpServer: Send + Sync + 'static {
    /// Process one inbound message. Requests yield exactly one reply;
    /// notifications and client responses yield none.
    async fn handle_message(
        &self,
        message: JsonRpcMessage,
        session: &SessionContext,
    ) -> Option<JsonRpcReply>;
}

#[async_trait]
impl<E> McpServer for JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    async fn handle_message(
        &self,
        message: JsonRpcMessage,
        session: &SessionContext,
    ) -> Option<JsonRpcReply> {
        match JsonRpcDispatcher::handle_message(self, message, session).await {
            Ok(reply) => reply,
            Err(err) => {
                error!(
                    "Notification handling failed for session {}: {}",
                    session.session_id, err
                );
                None
            }
        }
    }
}

/// A server instance pinned to the version it serves
#[derive(Clone)]
pub struct McpBackend {
    version: ApiVersion,
    server: Arc<dyn McpServer>,
}

impl McpBackend {
    pub fn new<S: McpServer>(version: ApiVersion, server: S) -> Self {
        Self {
            version,
            server: Arc::new(server),
        }
    }

    pub fn from_arc(version: ApiVersion, server: Arc<dyn McpServer>) -> Self {
        Self { version, server }
    }

    pub fn version(&self) -> ApiVersion {
        self.version
    }

    /// Bind this server's method handlers to `transport` for its lifetime.
    ///
    /// Refuses transports created for another version so that a session can
    /// never be served by the wrong generation.
    pub fn connect(&self, transport: &dyn Transport) -> Result<(), TransportError> {
        if transport.version() != self.version {
            return Err(TransportError::VersionMismatch {
                transport: transport.version(),
                server: self.version,
            });
        }
        transport.bind(Arc::clone(&self.server))
    }
}

impl std::fmt::Debug for McpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpBackend")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
