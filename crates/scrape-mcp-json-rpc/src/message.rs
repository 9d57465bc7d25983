//! Classification of inbound JSON-RPC payloads

use serde_json::Value;

use crate::{
    error::JsonRpcError, notification::JsonRpcNotification, request::JsonRpcRequest,
    types::RequestId,
};

/// Any message a client may send to the server
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    /// A client's reply to a server-initiated request. Kept opaque.
    Response(Value),
}

impl JsonRpcMessage {
    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(req) => Some(&req.method),
            JsonRpcMessage::Notification(notif) => Some(&notif.method),
            JsonRpcMessage::Response(_) => None,
        }
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(req) => Some(&req.id),
            _ => None,
        }
    }

    /// Whether this is an `initialize` request
    pub fn is_initialize(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(req) if req.method == "initialize")
    }

    /// Attach `_meta.<key>` to requests and notifications
    pub fn inject_meta(&mut self, key: &str, value: Value) {
        match self {
            JsonRpcMessage::Request(req) => req.inject_meta(key, value),
            JsonRpcMessage::Notification(notif) => notif.inject_meta(key, value),
            JsonRpcMessage::Response(_) => {}
        }
    }
}

/// Parse an already-decoded JSON value into a JSON-RPC message.
///
/// Errors carry the request id when one could be recovered so the caller can
/// echo it.
pub fn parse_json_rpc_message(value: Value) -> Result<JsonRpcMessage, JsonRpcError> {
    let Some(obj) = value.as_object() else {
        return Err(JsonRpcError::invalid_request(None, None));
    };

    let id = obj.get("id").and_then(RequestId::from_value);

    match obj.get("jsonrpc") {
        Some(version) if version == "2.0" => {}
        _ => return Err(JsonRpcError::invalid_request(id, None)),
    }

    if obj.contains_key("method") {
        if obj.get("id").is_some_and(|v| !v.is_null()) {
            serde_json::from_value::<JsonRpcRequest>(value)
                .map(JsonRpcMessage::Request)
                .map_err(|_| JsonRpcError::invalid_request(id, None))
        } else {
            serde_json::from_value::<JsonRpcNotification>(value)
                .map(JsonRpcMessage::Notification)
                .map_err(|_| JsonRpcError::invalid_request(None, None))
        }
    } else if obj.contains_key("result") || obj.contains_key("error") {
        Ok(JsonRpcMessage::Response(value))
    } else {
        Err(JsonRpcError::invalid_request(id, None))
    }
}

/// `method` of a raw payload, without validating the rest of it
pub fn peek_method(value: &Value) -> Option<&str> {
    value.get("method").and_then(Value::as_str)
}

/// `id` of a raw payload, without validating the rest of it
pub fn peek_request_id(value: &Value) -> Option<RequestId> {
    value.get("id").and_then(RequestId::from_value)
}
