//! End-to-end tests for the gateway's HTTP surface: health, unknown routes,
//! CORS preflight and body limits.

mod common;

use serde_json::{Value, json};

use common::TestGateway;
use scrape_mcp_gateway::ServerConfig;

#[tokio::test]
async fn test_health_lists_both_versions() {
    let gateway = TestGateway::start().await;
    let _open = gateway.open_sse("/abc123/sse").await;

    let response = gateway.client.get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["versions"]["v1"]["endpoints"]["sse"], "/{apiKey}/sse");
    assert_eq!(body["versions"]["v1"]["endpoints"]["mcp"], "/{apiKey}/v1/mcp");
    assert_eq!(body["versions"]["v2"]["endpoints"]["sse"], "/{apiKey}/v2/sse");
    assert_eq!(body["versions"]["v2"]["endpoints"]["messages"], "/{apiKey}/v2/messages");
}

#[tokio::test]
async fn test_unknown_route() {
    let gateway = TestGateway::start().await;

    let response = gateway.client.get(gateway.url("/abc123/v3/mcp")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Not found");
    assert!(body["availableEndpoints"].as_array().unwrap().len() >= 7);
}

#[tokio::test]
async fn test_cors_preflight() {
    let gateway = TestGateway::start().await;

    let response = gateway
        .client
        .request(reqwest::Method::OPTIONS, gateway.url("/abc123/v1/mcp"))
        .header("origin", "https://app.example")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(response.headers()["access-control-expose-headers"], "Mcp-Session-Id");
    assert!(gateway.registry().is_empty());
}

#[tokio::test]
async fn test_cors_can_be_disabled() {
    let gateway = TestGateway::start_with(ServerConfig {
        enable_cors: false,
        ..ServerConfig::default()
    })
    .await;

    let response = gateway.client.get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn test_body_limit() {
    let gateway = TestGateway::start_with(ServerConfig {
        max_body_size: 1024,
        ..ServerConfig::default()
    })
    .await;
    let oversized = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {"padding": "x".repeat(2048)}
    });

    let response = gateway.post_json("/abc123/v1/mcp", oversized.clone()).await;
    assert_eq!(response.status(), 413);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32603);

    let response = gateway.post_json("/abc123/messages", oversized).await;
    assert_eq!(response.status(), 413);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Request body too large");

    assert!(gateway.registry().is_empty());
}
