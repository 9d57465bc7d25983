//! Response construction helpers
//!
//! Every helper builds the response in place instead of going through
//! `Response::builder()`, so there is no failure path to unwrap.

use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::UnsyncBoxBody};
use hyper::header::{self, HeaderName, HeaderValue};
use hyper::{Response, StatusCode};
use serde_json::Value;

use scrape_mcp_json_rpc::{JsonRpcError, RequestId};

use crate::transport::SseBody;

/// Body type for every gateway response
pub type GatewayBody = UnsyncBoxBody<Bytes, Infallible>;

pub fn full(data: impl Into<Bytes>) -> GatewayBody {
    Full::new(data.into()).boxed_unsync()
}

pub fn empty() -> GatewayBody {
    Empty::<Bytes>::new().boxed_unsync()
}

fn with_content_type(
    status: StatusCode,
    content_type: &'static str,
    body: GatewayBody,
) -> Response<GatewayBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// JSON document with the given status
pub fn json(status: StatusCode, value: &Value) -> Response<GatewayBody> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    with_content_type(status, "application/json", full(body))
}

/// JSON-RPC error envelope with the given status
pub fn jsonrpc_error(status: StatusCode, error: &JsonRpcError) -> Response<GatewayBody> {
    let value = serde_json::to_value(error).unwrap_or(Value::Null);
    json(status, &value)
}

/// 500 with the `-32603` envelope, echoing `id` when known
pub fn internal_error(id: Option<RequestId>) -> Response<GatewayBody> {
    jsonrpc_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        &JsonRpcError::internal_error(id, Some("Internal server error".to_string())),
    )
}

/// `{"error": message}`
pub fn error_json(status: StatusCode, message: impl Into<String>) -> Response<GatewayBody> {
    json(status, &serde_json::json!({ "error": message.into() }))
}

pub fn text(status: StatusCode, text: &'static str) -> Response<GatewayBody> {
    with_content_type(status, "text/plain; charset=utf-8", full(text))
}

pub fn status_only(status: StatusCode) -> Response<GatewayBody> {
    let mut response = Response::new(empty());
    *response.status_mut() = status;
    response
}

/// Long-lived event stream
pub fn sse(body: SseBody) -> Response<GatewayBody> {
    let mut response = with_content_type(StatusCode::OK, "text/event-stream", body.boxed_unsync());
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

/// Attach a header whose value came from runtime data. Values that are not
/// valid header text are skipped.
pub fn with_header(
    mut response: Response<GatewayBody>,
    name: HeaderName,
    value: &str,
) -> Response<GatewayBody> {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn body_json(response: Response<GatewayBody>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_jsonrpc_error_response() {
        let response = jsonrpc_error(
            StatusCode::BAD_REQUEST,
            &JsonRpcError::session_not_found(Some(scrape_mcp_json_rpc::RequestId::Number(2))),
        );
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(
            body_json(response).await,
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32000, "message": "Invalid or missing session ID"},
                "id": 2
            })
        );
    }

    #[tokio::test]
    async fn test_internal_error_envelope() {
        let response = internal_error(None);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32603, "message": "Internal server error"},
                "id": null
            })
        );
        let response = internal_error(Some(RequestId::Number(4)));
        assert_eq!(body_json(response).await["id"], 4);
    }

    #[tokio::test]
    async fn test_error_json() {
        let response = error_json(StatusCode::NOT_FOUND, "nope");
        assert_eq!(body_json(response).await, json!({"error": "nope"}));
    }

    #[test]
    fn test_invalid_header_value_is_skipped() {
        let response = with_header(
            status_only(StatusCode::OK),
            HeaderName::from_static("mcp-session-id"),
            "bad\nvalue",
        );
        assert!(response.headers().get("mcp-session-id").is_none());
    }
}
