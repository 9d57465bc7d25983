//! Legacy HTTP+SSE transport
//!
//! One long-lived `GET` response carries every server-to-client message for
//! the session. Client-to-server messages arrive as separate `POST`s to the
//! reply path advertised in the opening `endpoint` event and are queued to a
//! single worker, so replies leave in the order messages arrived.

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{FutureExt, Stream};
use http_body::{Body, Frame};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, warn};
use uuid::Uuid;

use scrape_mcp_json_rpc::{JsonRpcError, JsonRpcMessage, JsonRpcReply};

use super::{Transport, TransportError, TransportKind, session_context};
use crate::backend::McpServer;
use crate::identity::SESSION_QUERY_PARAM;
use crate::version::ApiVersion;

const INBOUND_QUEUE: usize = 64;
const OUTBOUND_QUEUE: usize = 256;

/// Events written to an SSE stream
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// First event on every stream: where to POST messages
    Endpoint(String),
    /// A JSON-RPC payload
    Message(Value),
    /// Comment line that keeps intermediaries from idling the stream out
    KeepAlive,
}

impl SseEvent {
    /// Format as SSE wire text
    pub fn format(&self) -> String {
        match self {
            SseEvent::Endpoint(path) => format!("event: endpoint\ndata: {}\n\n", path),
            SseEvent::Message(data) => format!(
                "event: message\ndata: {}\n\n",
                serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string())
            ),
            SseEvent::KeepAlive => ": keepalive\n\n".to_string(),
        }
    }
}

/// Streaming response body for an SSE connection.
///
/// When built with [`SseBody::close_on_drop`], dropping the body (client went
/// away, connection timed out) cancels the given token.
pub struct SseBody {
    stream: Pin<Box<dyn Stream<Item = Bytes> + Send>>,
    _disconnect: Option<DropGuard>,
}

impl SseBody {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            _disconnect: None,
        }
    }

    pub fn close_on_drop(mut self, token: CancellationToken) -> Self {
        self._disconnect = Some(token.drop_guard());
        self
    }
}

impl Body for SseBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(data)) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Build the wire stream for one SSE connection: the given first event, then
/// queued events and periodic keep-alives until `closed` fires or the queue
/// is dropped.
pub(crate) fn event_stream(
    first: Option<SseEvent>,
    mut outbound: mpsc::Receiver<SseEvent>,
    closed: CancellationToken,
    keepalive: Duration,
) -> impl Stream<Item = Bytes> + Send + 'static {
    async_stream::stream! {
        if let Some(event) = first {
            yield Bytes::from(event.format());
        }

        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);

        loop {
            tokio::select! {
                _ = closed.cancelled() => break,
                event = outbound.recv() => match event {
                    Some(event) => yield Bytes::from(event.format()),
                    None => break,
                },
                _ = ticker.tick() => yield Bytes::from(SseEvent::KeepAlive.format()),
            }
        }
    }
}

/// Transport for one SSE connection
pub struct SseTransport {
    session_id: String,
    api_key: String,
    version: ApiVersion,
    endpoint: String,
    inbound: mpsc::Sender<JsonRpcMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<JsonRpcMessage>>>,
    outbound: mpsc::Sender<SseEvent>,
    closed: CancellationToken,
}

impl SseTransport {
    /// Create a transport with a fresh random session id and the response
    /// body that streams its events.
    pub fn open(
        api_key: impl Into<String>,
        version: ApiVersion,
        keepalive: Duration,
    ) -> (Arc<Self>, SseBody) {
        let api_key = api_key.into();
        let session_id = Uuid::new_v4().to_string();
        let endpoint = format!(
            "{}?{}={}",
            version.messages_path(&api_key),
            SESSION_QUERY_PARAM,
            session_id
        );

        let (inbound, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let closed = CancellationToken::new();

        let stream = event_stream(
            Some(SseEvent::Endpoint(endpoint.clone())),
            outbound_rx,
            closed.clone(),
            keepalive,
        );
        let body = SseBody::new(stream).close_on_drop(closed.clone());

        let transport = Arc::new(Self {
            session_id,
            api_key,
            version,
            endpoint,
            inbound,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            outbound,
            closed,
        });

        (transport, body)
    }

    /// Reply path (with `sessionId` query) advertised to the client
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Queue a client message for the session worker
    pub async fn handle_post_message(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.inbound_rx.lock().is_some() {
            return Err(TransportError::NotConnected);
        }
        self.inbound
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Push a server-initiated event onto the stream
    pub async fn send(&self, event: SseEvent) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(event)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn version(&self) -> ApiVersion {
        self.version
    }

    fn api_key(&self) -> &str {
        &self.api_key
    }

    fn session_id(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    fn bind(&self, server: Arc<dyn McpServer>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let Some(mut inbound) = self.inbound_rx.lock().take() else {
            return Err(TransportError::AlreadyConnected);
        };

        let context = session_context(self);
        let outbound = self.outbound.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = closed.cancelled() => break,
                    message = inbound.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                // a panicking backend answers this message and the worker carries on
                let request_id = message.request_id().cloned();
                let reply = match AssertUnwindSafe(server.handle_message(message, &context))
                    .catch_unwind()
                    .await
                {
                    Ok(reply) => reply,
                    Err(_) => {
                        error!(
                            "Unhandled panic while handling message for SSE session {}",
                            context.session_id
                        );
                        request_id.map(|id| {
                            JsonRpcReply::from(JsonRpcError::internal_error(
                                Some(id),
                                Some("Internal server error".to_string()),
                            ))
                        })
                    }
                };

                if let Some(reply) = reply
                    && outbound.send(SseEvent::Message(reply.to_value())).await.is_err()
                {
                    warn!(
                        "SSE stream for session {} is gone; dropping reply",
                        context.session_id
                    );
                    break;
                }
            }
            debug!("SSE worker finished for session {}", context.session_id);
        });

        Ok(())
    }

    fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}
