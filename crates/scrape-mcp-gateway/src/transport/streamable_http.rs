//! Streamable HTTP transport
//!
//! A session is created by an `initialize` POST. The transport exists before
//! it has an id; the id is assigned while that first request is handled and
//! delivered through [`PendingSession`], which is what the session manager
//! awaits before indexing the transport.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use hyper::header::{self, HeaderName, HeaderValue};
use hyper::{Method, Response, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use scrape_mcp_json_rpc::{JsonRpcError, JsonRpcErrorObject, JsonRpcMessage};

use super::sse::{SseBody, SseEvent, event_stream};
use super::{Transport, TransportError, TransportKind, session_context};
use crate::backend::McpServer;
use crate::identity::SESSION_HEADER;
use crate::response::{self, GatewayBody};
use crate::version::ApiVersion;

/// Produces session ids for new transports
pub type SessionIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Random v4 UUIDs
pub fn random_session_id() -> String {
    Uuid::new_v4().to_string()
}

const STANDALONE_QUEUE: usize = 64;

/// Resolves with the session id once the transport's `initialize` request has
/// been accepted. Resolves to [`TransportError::NotInitialized`] if the
/// transport is dropped or the request is refused first.
pub struct PendingSession {
    assigned: oneshot::Receiver<String>,
}

impl Future for PendingSession {
    type Output = Result<String, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.assigned)
            .poll(cx)
            .map(|res| res.map_err(|_| TransportError::NotInitialized))
    }
}

pub struct StreamableHttpTransport {
    api_key: String,
    version: ApiVersion,
    session_id: OnceLock<String>,
    id_generator: SessionIdGenerator,
    ready: Mutex<Option<oneshot::Sender<String>>>,
    server: OnceLock<Arc<dyn McpServer>>,
    standalone: Mutex<Option<mpsc::Sender<SseEvent>>>,
    last_seen: Mutex<Instant>,
    keepalive: Duration,
    closed: CancellationToken,
}

impl StreamableHttpTransport {
    /// Phase one of session creation: a transport with no id yet, and the
    /// future that yields its id.
    pub fn create_pending(
        api_key: impl Into<String>,
        version: ApiVersion,
        id_generator: SessionIdGenerator,
        keepalive: Duration,
    ) -> (Arc<Self>, PendingSession) {
        let (ready, assigned) = oneshot::channel();
        let transport = Arc::new(Self {
            api_key: api_key.into(),
            version,
            session_id: OnceLock::new(),
            id_generator,
            ready: Mutex::new(Some(ready)),
            server: OnceLock::new(),
            standalone: Mutex::new(None),
            last_seen: Mutex::new(Instant::now()),
            keepalive,
            closed: CancellationToken::new(),
        });
        (transport, PendingSession { assigned })
    }

    /// Record activity for idle expiry
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Handle one HTTP exchange addressed to this session
    pub async fn handle_request(
        &self,
        method: &Method,
        message: Option<JsonRpcMessage>,
    ) -> Response<GatewayBody> {
        self.touch();

        match *method {
            Method::POST => match message {
                Some(message) => self.handle_post(message).await,
                None => response::jsonrpc_error(
                    StatusCode::BAD_REQUEST,
                    &JsonRpcError::invalid_request(None, None),
                ),
            },
            Method::GET => self.handle_get(),
            Method::DELETE => self.handle_delete(),
            _ => {
                let mut response = response::jsonrpc_error(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &JsonRpcError::new(
                        None,
                        JsonRpcErrorObject::server_error(-32000, "Method not allowed."),
                    ),
                );
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static("GET, POST, DELETE"));
                response
            }
        }
    }

    async fn handle_post(&self, message: JsonRpcMessage) -> Response<GatewayBody> {
        // taken first so that every early return below drops it and the
        // pending session resolves instead of hanging
        let ready = if message.is_initialize() {
            let Some(ready) = self.ready.lock().take() else {
                return response::jsonrpc_error(
                    StatusCode::BAD_REQUEST,
                    &JsonRpcError::invalid_request(
                        message.request_id().cloned(),
                        Some("Invalid Request: Server already initialized".to_string()),
                    ),
                );
            };
            Some(ready)
        } else {
            None
        };

        if self.is_closed() {
            return not_initialized(&message);
        }
        let Some(server) = self.server.get() else {
            return response::jsonrpc_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &JsonRpcError::internal_error(message.request_id().cloned(), None),
            );
        };

        if let Some(ready) = ready {
            let session_id = self.session_id.get_or_init(|| (self.id_generator)()).clone();
            info!(
                "Streamable HTTP session {} initialized for {} ({})",
                session_id, self.api_key, self.version
            );
            // receiver gone means the caller stopped waiting; the session is still usable
            let _ = ready.send(session_id);
        } else if self.session_id.get().is_none() {
            return not_initialized(&message);
        }

        let context = session_context(self);
        let reply = server.handle_message(message, &context).await;

        let response = match reply {
            Some(reply) => response::json(StatusCode::OK, &reply.to_value()),
            None => response::status_only(StatusCode::ACCEPTED),
        };
        response::with_header(
            response,
            HeaderName::from_static(SESSION_HEADER),
            &context.session_id,
        )
    }

    fn handle_get(&self) -> Response<GatewayBody> {
        let Some(session_id) = self.session_id.get() else {
            return not_initialized_without_id();
        };

        let mut standalone = self.standalone.lock();
        if standalone.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return response::jsonrpc_error(
                StatusCode::CONFLICT,
                &JsonRpcError::new(
                    None,
                    JsonRpcErrorObject::server_error(
                        -32000,
                        "Conflict: Only one SSE stream is allowed per session",
                    ),
                ),
            );
        }

        let (tx, rx) = mpsc::channel(STANDALONE_QUEUE);
        *standalone = Some(tx);
        debug!("Opened notification stream for session {}", session_id);

        let body = SseBody::new(event_stream(None, rx, self.closed.clone(), self.keepalive));
        response::with_header(
            response::sse(body),
            HeaderName::from_static(SESSION_HEADER),
            session_id,
        )
    }

    fn handle_delete(&self) -> Response<GatewayBody> {
        let Some(session_id) = self.session_id.get() else {
            return not_initialized_without_id();
        };
        info!("Session {} terminated by client", session_id);
        // a concurrent close already did the work
        let _ = self.close();
        response::status_only(StatusCode::OK)
    }

    /// Push a server-initiated message onto the session's notification stream
    pub async fn notify(&self, message: Value) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let Some(tx) = self.standalone.lock().clone() else {
            return Err(TransportError::NotConnected);
        };
        tx.send(SseEvent::Message(message))
            .await
            .map_err(|_| TransportError::NotConnected)
    }
}

fn not_initialized(message: &JsonRpcMessage) -> Response<GatewayBody> {
    response::jsonrpc_error(
        StatusCode::BAD_REQUEST,
        &JsonRpcError::new(
            message.request_id().cloned(),
            JsonRpcErrorObject::server_error(-32000, "Bad Request: Server not initialized"),
        ),
    )
}

fn not_initialized_without_id() -> Response<GatewayBody> {
    not_initialized(&JsonRpcMessage::Response(Value::Null))
}

impl Transport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    fn version(&self) -> ApiVersion {
        self.version
    }

    fn api_key(&self) -> &str {
        &self.api_key
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id.get().map(String::as_str)
    }

    fn bind(&self, server: Arc<dyn McpServer>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.server
            .set(server)
            .map_err(|_| TransportError::AlreadyConnected)
    }

    fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use scrape_mcp_json_rpc::{
        JsonRpcNotification, JsonRpcReply, JsonRpcRequest, JsonRpcResponse, RequestId,
        SessionContext,
    };
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl McpServer for Echo {
        async fn handle_message(
            &self,
            message: JsonRpcMessage,
            session: &SessionContext,
        ) -> Option<JsonRpcReply> {
            let JsonRpcMessage::Request(req) = message else {
                return None;
            };
            Some(
                JsonRpcResponse::success(
                    req.id,
                    json!({"method": req.method, "session": session.session_id}),
                )
                .into(),
            )
        }
    }

    fn fixed_id(id: &'static str) -> SessionIdGenerator {
        Arc::new(move || id.to_string())
    }

    fn request(id: i64, method: &str) -> JsonRpcMessage {
        JsonRpcMessage::Request(JsonRpcRequest::new(RequestId::Number(id), method, None))
    }

    fn connected(id: &'static str) -> (Arc<StreamableHttpTransport>, PendingSession) {
        let (transport, pending) = StreamableHttpTransport::create_pending(
            "abc",
            ApiVersion::V1,
            fixed_id(id),
            Duration::from_secs(30),
        );
        transport.bind(Arc::new(Echo)).unwrap();
        (transport, pending)
    }

    async fn body_json(response: Response<GatewayBody>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_assigns_id() {
        let (transport, pending) = connected("sess-1");
        assert_eq!(transport.session_id(), None);

        let post = Method::POST;
        let (response, assigned) = tokio::join!(
            transport.handle_request(&post, Some(request(1, "initialize"))),
            pending
        );

        assert_eq!(assigned.unwrap(), "sess-1");
        assert_eq!(transport.session_id(), Some("sess-1"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[SESSION_HEADER], "sess-1");
        assert_eq!(
            body_json(response).await["result"],
            json!({"method": "initialize", "session": "sess-1"})
        );
    }

    #[tokio::test]
    async fn test_request_before_initialize_is_rejected() {
        let (transport, pending) = connected("sess-1");
        let response = transport
            .handle_request(&Method::POST, Some(request(7, "tools/list")))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["id"], 7);

        drop(transport);
        assert_eq!(pending.await, Err(TransportError::NotInitialized));
    }

    #[tokio::test]
    async fn test_second_initialize_is_invalid_request() {
        let (transport, _pending) = connected("sess-1");
        transport
            .handle_request(&Method::POST, Some(request(1, "initialize")))
            .await;
        let response = transport
            .handle_request(&Method::POST, Some(request(2, "initialize")))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32600);
        assert_eq!(
            body["error"]["message"],
            "Invalid Request: Server already initialized"
        );
    }

    #[tokio::test]
    async fn test_notification_is_accepted() {
        let (transport, _pending) = connected("sess-1");
        transport
            .handle_request(&Method::POST, Some(request(1, "initialize")))
            .await;

        let response = transport
            .handle_request(
                &Method::POST,
                Some(JsonRpcMessage::Notification(JsonRpcNotification::new(
                    "notifications/initialized",
                    None,
                ))),
            )
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_delete_closes_session() {
        let (transport, _pending) = connected("sess-1");
        transport
            .handle_request(&Method::POST, Some(request(1, "initialize")))
            .await;

        let response = transport.handle_request(&Method::DELETE, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_get_stream_and_conflict() {
        let (transport, _pending) = connected("sess-1");
        transport
            .handle_request(&Method::POST, Some(request(1, "initialize")))
            .await;

        let stream = transport.handle_request(&Method::GET, None).await;
        assert_eq!(stream.status(), StatusCode::OK);
        assert_eq!(stream.headers()[header::CONTENT_TYPE], "text/event-stream");

        let second = transport.handle_request(&Method::GET, None).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);

        transport.notify(json!({"jsonrpc": "2.0", "method": "ping"})).await.unwrap();
        let mut body = stream.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.starts_with("event: message\n"));

        transport.close().unwrap();
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn test_other_verbs_are_not_allowed() {
        let (transport, _pending) = connected("sess-1");
        let response = transport.handle_request(&Method::PUT, None).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(response.headers().contains_key(header::ALLOW));
    }

    #[tokio::test]
    async fn test_unbound_transport_reports_internal_error() {
        let (transport, _pending) = StreamableHttpTransport::create_pending(
            "abc",
            ApiVersion::V2,
            Arc::new(random_session_id),
            Duration::from_secs(30),
        );
        let response = transport
            .handle_request(&Method::POST, Some(request(3, "initialize")))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["id"], 3);
    }

    #[test]
    fn test_idle_tracking() {
        let (transport, _pending) = connected("sess-1");
        std::thread::sleep(Duration::from_millis(5));
        assert!(transport.idle_for() >= Duration::from_millis(5));
        transport.touch();
        assert!(transport.idle_for() < Duration::from_millis(5));
    }
}
