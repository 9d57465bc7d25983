//! Streamable-HTTP Session Manager
//!
//! Per request: resolve an existing session for the same API key and version
//! and delegate to it; otherwise create one if the payload is `initialize`;
//! otherwise reject with `-32000`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use hyper::{HeaderMap, Method, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use scrape_mcp_json_rpc::{
    JsonRpcError, JsonRpcMessage, parse_json_rpc_message, peek_method, peek_request_id,
};

use crate::identity::{CompositeKey, extract_session_id};
use crate::lifecycle::{PendingAnswer, watch_close};
use crate::registry::SessionRegistry;
use crate::response::{self, GatewayBody};
use crate::router::{VersionRouter, inject_api_key};
use crate::transport::streamable_http::SessionIdGenerator;
use crate::transport::{StreamableHttpTransport, Transport, TransportKind};
use crate::version::ApiVersion;

/// One inbound exchange on `/{apiKey}/{version}/mcp`
#[derive(Debug, Clone)]
pub struct McpRequest<'a> {
    pub api_key: &'a str,
    pub version: ApiVersion,
    pub method: Method,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
}

#[derive(Clone)]
pub struct StreamableHttpSessionManager {
    registry: Arc<SessionRegistry>,
    router: Arc<VersionRouter>,
    id_generator: SessionIdGenerator,
    keepalive: Duration,
}

impl StreamableHttpSessionManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        router: Arc<VersionRouter>,
        id_generator: SessionIdGenerator,
        keepalive: Duration,
    ) -> Self {
        Self {
            registry,
            router,
            id_generator,
            keepalive,
        }
    }

    /// Handle one request. A panic anywhere below is turned into a `-32603`
    /// envelope echoing the request id.
    pub async fn handle(&self, request: McpRequest<'_>, body: Bytes) -> Response<GatewayBody> {
        match AssertUnwindSafe(self.route(&request, &body)).catch_unwind().await {
            Ok(response) => response,
            Err(_) => {
                error!(
                    "Unhandled panic while handling {} {} request for {}",
                    request.method, request.version, request.api_key
                );
                let id = serde_json::from_slice::<Value>(&body)
                    .ok()
                    .and_then(|value| peek_request_id(&value));
                response::internal_error(id)
            }
        }
    }

    async fn route(&self, request: &McpRequest<'_>, body: &Bytes) -> Response<GatewayBody> {
        let payload = if request.method == Method::POST {
            match serde_json::from_slice::<Value>(body) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!("Unparseable body from {}: {}", request.api_key, err);
                    return response::jsonrpc_error(
                        StatusCode::BAD_REQUEST,
                        &JsonRpcError::parse_error(),
                    );
                }
            }
        } else {
            None
        };
        let request_id = payload.as_ref().and_then(peek_request_id);

        // existing session for this key and version
        if let Some((session_id, source)) = extract_session_id(request.query, request.headers) {
            let key = CompositeKey::new(request.api_key, session_id);
            match self.registry.lookup(&key) {
                Some(entry)
                    if entry.version == request.version
                        && entry.kind() == TransportKind::StreamableHttp =>
                {
                    if let Some(transport) = entry.transport.as_streamable() {
                        debug!("Session {} resolved from {:?}", key, source);
                        return self.delegate(transport, request, payload).await;
                    }
                }
                Some(entry) => warn!(
                    "Session {} belongs to {} {:?}; refusing {} Streamable HTTP request",
                    key,
                    entry.version,
                    entry.kind(),
                    request.version
                ),
                None => debug!("No session {} in registry", key),
            }
        }

        // new session
        if let Some(payload) = payload
            && peek_method(&payload) == Some("initialize")
        {
            return match parse_json_rpc_message(payload) {
                Ok(message) => self.initialize(request, message).await,
                Err(err) => response::jsonrpc_error(StatusCode::BAD_REQUEST, &err),
            };
        }

        warn!(
            "Rejected {} {} request for {}: no valid session",
            request.method, request.version, request.api_key
        );
        response::jsonrpc_error(
            StatusCode::BAD_REQUEST,
            &JsonRpcError::session_not_found(request_id),
        )
    }

    async fn delegate(
        &self,
        transport: &StreamableHttpTransport,
        request: &McpRequest<'_>,
        payload: Option<Value>,
    ) -> Response<GatewayBody> {
        let message = match payload.map(parse_json_rpc_message).transpose() {
            Ok(message) => message.map(|mut message| {
                inject_api_key(&mut message, request.api_key);
                message
            }),
            Err(err) => return response::jsonrpc_error(StatusCode::BAD_REQUEST, &err),
        };
        transport.handle_request(&request.method, message).await
    }

    /// Create, connect and register a new session, then answer the
    /// `initialize` request on it. The registry write completes before the
    /// response is returned; if the response is never returned the session is
    /// discarded again.
    async fn initialize(
        &self,
        request: &McpRequest<'_>,
        mut message: JsonRpcMessage,
    ) -> Response<GatewayBody> {
        let (transport, pending) = StreamableHttpTransport::create_pending(
            request.api_key,
            request.version,
            Arc::clone(&self.id_generator),
            self.keepalive,
        );

        if let Err(err) = self.router.attach(transport.as_ref()) {
            error!(
                "Failed to connect {} backend for {}: {}",
                request.version, request.api_key, err
            );
            return response::internal_error(message.request_id().cloned());
        }

        inject_api_key(&mut message, request.api_key);

        let registration = async {
            match pending.await {
                Ok(session_id) => {
                    let key = CompositeKey::new(request.api_key, session_id);
                    self.registry
                        .register(key.clone(), Arc::clone(&transport), request.version);
                    info!("Streamable HTTP session {} registered ({})", key, request.version);
                    watch_close(Arc::clone(&self.registry), key.clone(), Arc::clone(&transport).into());
                    Some(PendingAnswer::new(
                        Arc::clone(&self.registry),
                        key,
                        Arc::clone(&transport).into(),
                    ))
                }
                Err(err) => {
                    debug!("Initialize did not produce a session: {}", err);
                    None
                }
            }
        };

        // dropping this future before the join completes discards the session
        let method = Method::POST;
        let (response, registered) = tokio::join!(
            transport.handle_request(&method, Some(message)),
            registration
        );
        if let Some(registered) = registered {
            registered.answered();
        }
        response
    }
}

impl std::fmt::Debug for StreamableHttpSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpSessionManager")
            .field("sessions", &self.registry.len())
            .field("keepalive", &self.keepalive)
            .finish_non_exhaustive()
    }
}
