//! Gateway HTTP server
//!
//! Accept loop over hyper's HTTP/1 connection builder. Connection timeouts
//! are applied here, at the transport layer; a session whose connection times
//! out is torn down through the same close path as a client disconnect.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::backend::McpBackend;
use crate::connection::Activity;
use crate::gateway::Gateway;
use crate::lifecycle::Lifecycle;
use crate::registry::SessionRegistry;
use crate::router::VersionRouter;
use crate::transport::streamable_http::{SessionIdGenerator, random_session_id};
use crate::version::ApiVersion;
use crate::{GatewayError, Result};

/// Configuration for the gateway server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Attach permissive CORS headers
    pub enable_cors: bool,
    /// Maximum request body size
    pub max_body_size: usize,
    /// Idle time after which a keep-alive connection is closed; `None`
    /// closes each connection after one response
    pub keep_alive_timeout: Option<Duration>,
    /// Time allowed to receive request headers
    pub headers_timeout: Duration,
    /// Bound on producing a response head; `None` disables it
    pub request_timeout: Option<Duration>,
    /// Idle Streamable-HTTP sessions are closed after this; `None` disables it
    pub session_idle_timeout: Option<Duration>,
    /// How often the idle sweeper runs
    pub cleanup_interval: Duration,
    /// Interval between SSE keep-alive comments
    pub sse_keepalive_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            enable_cors: true,
            max_body_size: 4 * 1024 * 1024,
            keep_alive_timeout: Some(Duration::from_millis(65_000)),
            headers_timeout: Duration::from_millis(66_000),
            request_timeout: None,
            session_idle_timeout: Some(Duration::from_secs(30 * 60)),
            cleanup_interval: Duration::from_secs(60),
            sse_keepalive_interval: Duration::from_secs(15),
        }
    }
}

/// Builder for [`GatewayServer`]
pub struct GatewayServerBuilder {
    config: ServerConfig,
    v1: Option<McpBackend>,
    v2: Option<McpBackend>,
    id_generator: SessionIdGenerator,
    registry: Option<Arc<SessionRegistry>>,
}

impl GatewayServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            v1: None,
            v2: None,
            id_generator: Arc::new(random_session_id),
            registry: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    pub fn cors(mut self, enable: bool) -> Self {
        self.config.enable_cors = enable;
        self
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn keep_alive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.keep_alive_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn session_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.session_idle_timeout = timeout;
        self
    }

    pub fn sse_keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.sse_keepalive_interval = interval;
        self
    }

    /// Register the backend for the version it is pinned to
    pub fn backend(mut self, backend: McpBackend) -> Self {
        match backend.version() {
            ApiVersion::V1 => self.v1 = Some(backend),
            ApiVersion::V2 => self.v2 = Some(backend),
        }
        self
    }

    /// Override how Streamable-HTTP session ids are generated
    pub fn session_id_generator(mut self, generator: SessionIdGenerator) -> Self {
        self.id_generator = generator;
        self
    }

    /// Share an existing registry instead of creating a fresh one
    pub fn registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<GatewayServer> {
        let v1 = self.v1.ok_or(GatewayError::MissingBackend(ApiVersion::V1))?;
        let v2 = self.v2.ok_or(GatewayError::MissingBackend(ApiVersion::V2))?;
        let router = Arc::new(VersionRouter::new(v1, v2)?);

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(SessionRegistry::new()));
        let lifecycle = Lifecycle::new(Arc::clone(&registry));
        let gateway = Gateway::new(&self.config, Arc::clone(&registry), router, self.id_generator);

        Ok(GatewayServer {
            config: self.config,
            registry,
            lifecycle,
            gateway,
        })
    }
}

impl Default for GatewayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The multi-version MCP gateway
#[derive(Debug, Clone)]
pub struct GatewayServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    lifecycle: Lifecycle,
    gateway: Gateway,
}

impl GatewayServer {
    pub fn builder() -> GatewayServerBuilder {
        GatewayServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until [`Lifecycle::shutdown`] runs
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("MCP gateway listening on {}", local_addr);
        for version in ApiVersion::ALL {
            info!(
                "{}: SSE {} | messages {} | Streamable HTTP {}",
                version,
                version.sse_path_template(),
                version.messages_path_template(),
                version.mcp_path_template()
            );
        }

        if let Some(max_idle) = self.config.session_idle_timeout {
            self.lifecycle
                .start_idle_sweeper(max_idle, self.config.cleanup_interval);
        }

        let shutdown = self.lifecycle.shutdown_token();
        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Accept loop stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        // per-connection failures (e.g. fd exhaustion) must not stop the server
                        error!("Failed to accept connection: {}", err);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
            };
            debug!("New connection from {}", peer_addr);

            let mut builder = http1::Builder::new();
            builder
                .timer(TokioTimer::new())
                .header_read_timeout(self.config.headers_timeout)
                .keep_alive(self.config.keep_alive_timeout.is_some());

            let gateway = self.gateway.clone();
            let keep_alive = self.config.keep_alive_timeout;
            tokio::spawn(async move {
                let activity = Activity::new();
                let io = TokioIo::new(activity.track(stream));
                let busy = activity.clone();
                let service = service_fn(move |req: Request<Incoming>| {
                    let gateway = gateway.clone();
                    let busy = busy.clone();
                    async move {
                        let _busy = busy.busy();
                        Ok::<_, Infallible>(gateway.handle(req).await)
                    }
                });

                let conn = builder.serve_connection(io, service);
                tokio::pin!(conn);
                let result = match keep_alive {
                    Some(limit) => {
                        let mut closing = false;
                        loop {
                            tokio::select! {
                                result = conn.as_mut() => break result,
                                _ = tokio::time::sleep_until(activity.next_check(limit)), if !closing => {
                                    if activity.is_idle_for(limit) {
                                        debug!("Closing idle connection from {}", peer_addr);
                                        conn.as_mut().graceful_shutdown();
                                        closing = true;
                                    }
                                }
                            }
                        }
                    }
                    None => conn.await,
                };

                if let Err(err) = result {
                    let err_str = err.to_string();
                    if err_str.contains("connection closed before message completed") {
                        debug!("Client disconnected: {}", err);
                    } else {
                        error!("Error serving connection: {}", err);
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::McpServer;
    use async_trait::async_trait;
    use scrape_mcp_json_rpc::{JsonRpcMessage, JsonRpcReply, SessionContext};

    struct Silent;

    #[async_trait]
    impl McpServer for Silent {
        async fn handle_message(&self, _: JsonRpcMessage, _: &SessionContext) -> Option<JsonRpcReply> {
            None
        }
    }

    #[test]
    fn test_missing_backend() {
        let err = GatewayServer::builder()
            .backend(McpBackend::new(ApiVersion::V1, Silent))
            .build()
            .unwrap_err();
        assert!(matches!(err, GatewayError::MissingBackend(ApiVersion::V2)));
    }

    #[test]
    fn test_builder_config() {
        let server = GatewayServer::builder()
            .backend(McpBackend::new(ApiVersion::V1, Silent))
            .backend(McpBackend::new(ApiVersion::V2, Silent))
            .cors(false)
            .max_body_size(1024)
            .request_timeout(Some(Duration::from_secs(5)))
            .build()
            .unwrap();

        assert!(!server.config().enable_cors);
        assert_eq!(server.config().max_body_size, 1024);
        assert_eq!(server.config().request_timeout, Some(Duration::from_secs(5)));
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let server = GatewayServer::builder()
            .backend(McpBackend::new(ApiVersion::V1, Silent))
            .backend(McpBackend::new(ApiVersion::V2, Silent))
            .build()
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let serving = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };
        server.lifecycle().shutdown();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_idle_keep_alive_connection_is_closed() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let server = GatewayServer::builder()
            .backend(McpBackend::new(ApiVersion::V1, Silent))
            .backend(McpBackend::new(ApiVersion::V2, Silent))
            .keep_alive_timeout(Some(Duration::from_millis(200)))
            .build()
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await });
        }

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        while !String::from_utf8_lossy(&received).contains("\"status\":\"ok\"") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before the response");
            received.extend_from_slice(&buf[..n]);
        }

        // no further requests: the server hangs up once the limit passes
        let closed = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("idle connection was not closed");
        assert_eq!(closed.unwrap(), 0);

        server.lifecycle().shutdown();
    }
}
