//! Shared harness: a real gateway on an ephemeral port with a stubbed
//! scraping service behind it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::{Instant, sleep, timeout};

use scrape_mcp_gateway::{GatewayServer, ServerConfig, SessionRegistry};
use scrape_mcp_server::{ApiAuth, ScrapeApi, ScrapeError, build_server};

/// Scraping service stand-in that echoes what it was asked
pub struct EchoApi;

impl EchoApi {
    fn echo(op: &str, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError> {
        Ok(json!({
            "success": true,
            "data": {
                "op": op,
                "version": auth.version.as_str(),
                "apiKey": auth.api_key,
                "request": request,
            }
        }))
    }
}

#[async_trait]
impl ScrapeApi for EchoApi {
    async fn scrape(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError> {
        Self::echo("scrape", auth, request)
    }
    async fn map(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError> {
        Self::echo("map", auth, request)
    }
    async fn search(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError> {
        Self::echo("search", auth, request)
    }
    async fn crawl(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError> {
        Self::echo("crawl", auth, request)
    }
    async fn crawl_status(&self, auth: &ApiAuth, id: &str) -> Result<Value, ScrapeError> {
        Self::echo("crawl_status", auth, json!(id))
    }
    async fn extract(&self, auth: &ApiAuth, request: Value) -> Result<Value, ScrapeError> {
        Self::echo("extract", auth, request)
    }
}

pub struct TestGateway {
    pub server: GatewayServer,
    pub addr: SocketAddr,
    pub client: Client,
}

impl TestGateway {
    pub async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    pub async fn start_with(mut config: ServerConfig) -> Self {
        let _ = tracing_subscriber::fmt::try_init();

        // short keep-alives make client disconnects visible quickly
        config.sse_keepalive_interval = Duration::from_millis(50);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        config.bind_address = addr;

        let server = build_server(config, Arc::new(EchoApi)).unwrap();
        {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await });
        }

        Self {
            server,
            addr,
            client: Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.server.registry()
    }

    /// Open an SSE stream and read its `endpoint` event
    pub async fn open_sse(&self, path: &str) -> SseClient {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let mut sse = SseClient {
            response,
            buffer: String::new(),
            endpoint: String::new(),
            session_id: String::new(),
        };
        let (event, data) = sse.next_event().await;
        assert_eq!(event, "endpoint");
        sse.endpoint_path(data)
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Response {
        self.client
            .post(self.url(path))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    /// Streamable-HTTP initialize; returns the assigned session id
    pub async fn initialize(&self, path: &str) -> String {
        let response = self
            .post_json(
                path,
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "initialize",
                    "params": {
                        "protocolVersion": "2025-06-18",
                        "capabilities": {},
                        "clientInfo": {"name": "e2e", "version": "1.0.0"}
                    }
                }),
            )
            .await;
        assert_eq!(response.status(), 200);
        let session_id = response.headers()["mcp-session-id"]
            .to_str()
            .unwrap()
            .to_string();
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["id"], 1);
        assert!(body["result"]["protocolVersion"].is_string());
        session_id
    }
}

pub struct SseClient {
    response: Response,
    buffer: String,
    /// Reply path announced by the `endpoint` event
    pub endpoint: String,
    pub session_id: String,
}

impl SseClient {
    fn endpoint_path(mut self, data: String) -> Self {
        self.session_id = data
            .split("sessionId=")
            .nth(1)
            .unwrap_or_default()
            .to_string();
        self.endpoint = data;
        self
    }

    /// Next named event, skipping keep-alive comments
    pub async fn next_event(&mut self) -> (String, String) {
        timeout(Duration::from_secs(5), async {
            loop {
                while let Some(end) = self.buffer.find("\n\n") {
                    let block: String = self.buffer.drain(..end + 2).collect();
                    let mut event = None;
                    let mut data = None;
                    for line in block.lines() {
                        if let Some(value) = line.strip_prefix("event: ") {
                            event = Some(value.to_string());
                        } else if let Some(value) = line.strip_prefix("data: ") {
                            data = Some(value.to_string());
                        }
                    }
                    if let (Some(event), Some(data)) = (event, data) {
                        return (event, data);
                    }
                }
                let chunk = self.response.chunk().await.unwrap().expect("stream ended");
                self.buffer.push_str(&String::from_utf8_lossy(&chunk));
            }
        })
        .await
        .expect("timed out waiting for an SSE event")
    }

    /// Next `message` event parsed as JSON
    pub async fn next_message(&mut self) -> Value {
        let (event, data) = self.next_event().await;
        assert_eq!(event, "message");
        serde_json::from_str(&data).unwrap()
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(25)).await;
    }
    false
}
