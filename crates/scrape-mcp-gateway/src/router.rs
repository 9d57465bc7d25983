//! Version Router
//!
//! Holds one backend per version and hands out the one matching a route's
//! version segment. Lookups elsewhere always include the version, so this is
//! the only place a backend is chosen.

use serde_json::json;
use tracing::debug;

use scrape_mcp_json_rpc::JsonRpcMessage;

use crate::backend::McpBackend;
use crate::transport::{API_KEY_META, Transport, TransportError};
use crate::version::ApiVersion;

#[derive(Debug, Clone)]
pub struct VersionRouter {
    v1: McpBackend,
    v2: McpBackend,
}

impl VersionRouter {
    /// Backends must be pinned to the version slot they are given
    pub fn new(v1: McpBackend, v2: McpBackend) -> Result<Self, TransportError> {
        for (slot, backend) in [(ApiVersion::V1, &v1), (ApiVersion::V2, &v2)] {
            if backend.version() != slot {
                return Err(TransportError::VersionMismatch {
                    transport: slot,
                    server: backend.version(),
                });
            }
        }
        Ok(Self { v1, v2 })
    }

    pub fn backend(&self, version: ApiVersion) -> &McpBackend {
        match version {
            ApiVersion::V1 => &self.v1,
            ApiVersion::V2 => &self.v2,
        }
    }

    /// Connect `transport` to the backend for its own version
    pub fn attach(&self, transport: &dyn Transport) -> Result<(), TransportError> {
        debug!(
            "Attaching {} backend to {:?} transport for {}",
            transport.version(),
            transport.kind(),
            transport.api_key()
        );
        self.backend(transport.version()).connect(transport)
    }
}

/// Put the caller's API key into `params._meta` so the tool layer can
/// authenticate without seeing transport identity.
pub fn inject_api_key(message: &mut JsonRpcMessage, api_key: &str) {
    message.inject_meta(API_KEY_META, json!(api_key));
}
