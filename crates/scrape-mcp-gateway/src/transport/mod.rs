//! Per-session wire transports
//!
//! A transport mediates delivery for exactly one session and owns the
//! underlying stream resource. The registry only keeps a handle to it.

pub mod sse;
pub mod streamable_http;

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use scrape_mcp_json_rpc::SessionContext;

use crate::backend::McpServer;
use crate::version::ApiVersion;

pub use sse::{SseBody, SseEvent, SseTransport};
pub use streamable_http::{PendingSession, StreamableHttpTransport};

/// Metadata key under which the caller's API key is handed to backends
pub const API_KEY_META: &str = "apiKey";

/// Failures local to one transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is already connected to a server")]
    AlreadyConnected,

    #[error("transport is not connected to a server")]
    NotConnected,

    #[error("transport is closed")]
    Closed,

    #[error("{transport} transport cannot be served by a {server} server")]
    VersionMismatch {
        transport: ApiVersion,
        server: ApiVersion,
    },

    #[error("session was never initialized")]
    NotInitialized,
}

/// Which wire style a transport speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Sse,
    StreamableHttp,
}

/// Behaviour shared by both transport styles
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn version(&self) -> ApiVersion;

    fn api_key(&self) -> &str;

    /// Assigned session id; `None` until a Streamable-HTTP session initializes
    fn session_id(&self) -> Option<&str>;

    /// Attach the server that will process this session's messages
    fn bind(&self, server: Arc<dyn McpServer>) -> Result<(), TransportError>;

    /// Token cancelled exactly once, when the transport closes for any reason
    fn close_token(&self) -> CancellationToken;

    /// Close the transport. Closing an already-closed transport is reported as
    /// [`TransportError::Closed`] and changes nothing.
    fn close(&self) -> Result<(), TransportError> {
        let token = self.close_token();
        if token.is_cancelled() {
            return Err(TransportError::Closed);
        }
        token.cancel();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.close_token().is_cancelled()
    }
}

/// Context handed to the backend for every message on a transport
pub(crate) fn session_context(transport: &dyn Transport) -> SessionContext {
    SessionContext::new(transport.session_id().unwrap_or_default())
        .with_metadata(API_KEY_META, json!(transport.api_key()))
        .with_metadata("version", json!(transport.version().as_str()))
}

/// Registry-side handle to a live transport
#[derive(Clone)]
pub enum TransportHandle {
    Sse(Arc<SseTransport>),
    StreamableHttp(Arc<StreamableHttpTransport>),
}

impl TransportHandle {
    pub fn as_transport(&self) -> &dyn Transport {
        match self {
            TransportHandle::Sse(t) => t.as_ref(),
            TransportHandle::StreamableHttp(t) => t.as_ref(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.as_transport().kind()
    }

    pub fn close(&self) -> Result<(), TransportError> {
        self.as_transport().close()
    }

    pub fn as_sse(&self) -> Option<&Arc<SseTransport>> {
        match self {
            TransportHandle::Sse(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_streamable(&self) -> Option<&Arc<StreamableHttpTransport>> {
        match self {
            TransportHandle::StreamableHttp(t) => Some(t),
            _ => None,
        }
    }

    /// Whether both handles point at the same transport object
    pub fn same_transport(&self, other: &TransportHandle) -> bool {
        match (self, other) {
            (TransportHandle::Sse(a), TransportHandle::Sse(b)) => Arc::ptr_eq(a, b),
            (TransportHandle::StreamableHttp(a), TransportHandle::StreamableHttp(b)) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

impl From<Arc<SseTransport>> for TransportHandle {
    fn from(t: Arc<SseTransport>) -> Self {
        TransportHandle::Sse(t)
    }
}

impl From<Arc<StreamableHttpTransport>> for TransportHandle {
    fn from(t: Arc<StreamableHttpTransport>) -> Self {
        TransportHandle::StreamableHttp(t)
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transport = self.as_transport();
        f.debug_struct("TransportHandle")
            .field("kind", &transport.kind())
            .field("version", &transport.version())
            .field("session_id", &transport.session_id())
            .field("closed", &transport.is_closed())
            .finish()
    }
}
