//! End-to-end tests for the Streamable HTTP transport
//!
//! - initialize creates and registers a session before the response arrives
//! - follow-up requests resolve by query parameter or either session header
//! - unresolvable non-initialize requests get -32000
//! - sessions are pinned to their API key and version
//! - DELETE, GET stream and unsupported verbs

mod common;

use serde_json::{Value, json};

use common::{TestGateway, eventually};
use scrape_mcp_gateway::{ApiVersion, CompositeKey, TransportKind};

#[tokio::test]
async fn test_initialize_registers_session() {
    let gateway = TestGateway::start().await;
    let session_id = gateway.initialize("/abc123/v1/mcp").await;

    // registered by the time the response was received
    let entry = gateway
        .registry()
        .lookup(&CompositeKey::new("abc123", session_id))
        .expect("session registered");
    assert_eq!(entry.version, ApiVersion::V1);
    assert_eq!(entry.kind(), TransportKind::StreamableHttp);
    assert_eq!(entry.key.api_key(), "abc123");
}

#[tokio::test]
async fn test_missing_session_is_rejected() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .post_json("/abc123/v1/mcp", json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}))
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "jsonrpc": "2.0",
            "error": {"code": -32000, "message": "Invalid or missing session ID"},
            "id": 2
        })
    );
    assert!(gateway.registry().is_empty());
}

#[tokio::test]
async fn test_unknown_session_without_id_echoes_null() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .client
        .post(gateway.url("/abc123/v2/mcp?sessionId=nope"))
        .header("content-type", "application/json")
        .body(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32000);
    assert!(body["id"].is_null());
}

#[tokio::test]
async fn test_session_reuse_by_header_and_query() {
    let gateway = TestGateway::start().await;
    let session_id = gateway.initialize("/abc123/v2/mcp").await;
    let list = json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2});

    let by_header = gateway
        .client
        .post(gateway.url("/abc123/v2/mcp"))
        .header("mcp-session-id", &session_id)
        .body(list.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(by_header.status(), 200);
    assert_eq!(by_header.headers()["mcp-session-id"], session_id.as_str());
    let body: Value = by_header.json().await.unwrap();
    assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 6);

    let by_alt_header = gateway
        .client
        .post(gateway.url("/abc123/v2/mcp"))
        .header("x-mcp-session-id", &session_id)
        .body(list.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(by_alt_header.status(), 200);

    let by_query = gateway
        .post_json(&format!("/abc123/v2/mcp?sessionId={}", session_id), list)
        .await;
    assert_eq!(by_query.status(), 200);
}

#[tokio::test]
async fn test_notification_is_accepted() {
    let gateway = TestGateway::start().await;
    let session_id = gateway.initialize("/abc123/v1/mcp").await;

    let response = gateway
        .client
        .post(gateway.url("/abc123/v1/mcp"))
        .header("mcp-session-id", &session_id)
        .body(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
}

#[tokio::test]
async fn test_tool_call_over_session() {
    let gateway = TestGateway::start().await;
    let session_id = gateway.initialize("/tenant/v1/mcp").await;

    let response = gateway
        .client
        .post(gateway.url("/tenant/v1/mcp"))
        .header("mcp-session-id", &session_id)
        .body(
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": {"name": "firecrawl_search", "arguments": {"query": "rust"}}
            })
            .to_string(),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["isError"], false);
    let echoed: Value =
        serde_json::from_str(body["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(echoed["op"], "search");
    assert_eq!(echoed["apiKey"], "tenant");
    assert_eq!(echoed["version"], "v1");
}

#[tokio::test]
async fn test_session_is_pinned_to_version_and_key() {
    let gateway = TestGateway::start().await;
    let session_id = gateway.initialize("/abc123/v1/mcp").await;
    let list = json!({"jsonrpc": "2.0", "method": "tools/list", "id": 9});

    for path in ["/abc123/v2/mcp", "/someone-else/v1/mcp"] {
        let response = gateway
            .client
            .post(gateway.url(path))
            .header("mcp-session-id", &session_id)
            .body(list.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "{}", path);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["id"], 9);
    }
}

#[tokio::test]
async fn test_initialize_always_creates_a_session() {
    let gateway = TestGateway::start().await;

    let first = gateway.initialize("/abc123/v1/mcp").await;
    let second = gateway.initialize("/abc123/v1/mcp").await;
    assert_ne!(first, second);
    assert_eq!(gateway.registry().len(), 2);

    // initialize aimed at an existing session is refused by that session
    let response = gateway
        .client
        .post(gateway.url("/abc123/v1/mcp"))
        .header("mcp-session-id", &first)
        .body(json!({"jsonrpc": "2.0", "id": 5, "method": "initialize", "params": {}}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["error"]["message"], "Invalid Request: Server already initialized");
}

#[tokio::test]
async fn test_delete_closes_session() {
    let gateway = TestGateway::start().await;
    let registry = gateway.registry();
    let session_id = gateway.initialize("/abc123/v2/mcp").await;
    let key = CompositeKey::new("abc123", session_id.clone());

    let response = gateway
        .client
        .delete(gateway.url("/abc123/v2/mcp"))
        .header("mcp-session-id", &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(eventually(|| registry.lookup(&key).is_none()).await);

    let response = gateway
        .client
        .post(gateway.url("/abc123/v2/mcp"))
        .header("mcp-session-id", &session_id)
        .body(json!({"jsonrpc": "2.0", "method": "ping", "id": 1}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_get_stream_and_unsupported_verb() {
    let gateway = TestGateway::start().await;
    let session_id = gateway.initialize("/abc123/v1/mcp").await;

    let stream = gateway
        .client
        .get(gateway.url("/abc123/v1/mcp"))
        .header("mcp-session-id", &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);
    assert_eq!(stream.headers()["content-type"], "text/event-stream");

    let response = gateway
        .client
        .put(gateway.url("/abc123/v1/mcp"))
        .header("mcp-session-id", &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
    assert_eq!(response.headers()["allow"], "GET, POST, DELETE");

    // GET without a session is not a way to create one
    let response = gateway.client.get(gateway.url("/abc123/v1/mcp")).send().await.unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_parse_error() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .client
        .post(gateway.url("/abc123/v1/mcp"))
        .body("{\"jsonrpc\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
}
