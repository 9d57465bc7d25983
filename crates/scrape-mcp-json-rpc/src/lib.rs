//! # JSON-RPC 2.0 for the Scrape MCP Gateway
//!
//! Transport-agnostic JSON-RPC 2.0 types shared by the gateway and the
//! version-specific MCP servers behind it. Nothing in this crate knows about
//! HTTP, SSE or sessions.
//!
//! ## Contents
//! - Wire types: requests, notifications, responses and error envelopes
//! - [`parse_json_rpc_message`] for classifying inbound payloads
//! - Async [`JsonRpcHandler`] / [`JsonRpcDispatcher`] seam (feature `async`)

pub mod error;
pub mod message;
pub mod notification;
pub mod request;
pub mod response;
pub mod types;

#[cfg(feature = "async")]
pub mod r#async;

pub use error::{JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use message::{JsonRpcMessage, parse_json_rpc_message, peek_method, peek_request_id};
pub use notification::JsonRpcNotification;
pub use request::{JsonRpcRequest, RequestParams};
pub use response::{JsonRpcReply, JsonRpcResponse};
pub use types::{JsonRpcVersion, RequestId};

#[cfg(feature = "async")]
pub use r#async::{JsonRpcDispatcher, JsonRpcHandler, SessionContext, ToJsonRpcError};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes plus the server-range codes the gateway emits
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;

    /// Session could not be resolved for a non-initialize request
    pub const SESSION_NOT_FOUND: i64 = -32000;
}
