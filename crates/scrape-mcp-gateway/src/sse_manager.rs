//! SSE Connection Manager
//!
//! Opens long-lived event streams, indexes them in the registry, and routes
//! message POSTs to them. Entries are removed when the stream closes.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hyper::{HeaderMap, Response, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use scrape_mcp_json_rpc::parse_json_rpc_message;

use crate::fallback::{FallbackResolver, Resolution};
use crate::identity::{CompositeKey, extract_session_id, session_id_from_query};
use crate::lifecycle::watch_close;
use crate::registry::{SessionEntry, SessionRegistry};
use crate::response::{self, GatewayBody};
use crate::router::{VersionRouter, inject_api_key};
use crate::transport::{SseTransport, Transport, TransportError, TransportKind};
use crate::version::ApiVersion;

#[derive(Debug, Clone)]
pub struct SseConnectionManager {
    registry: Arc<SessionRegistry>,
    router: Arc<VersionRouter>,
    resolver: FallbackResolver,
    keepalive: Duration,
}

impl SseConnectionManager {
    pub fn new(registry: Arc<SessionRegistry>, router: Arc<VersionRouter>, keepalive: Duration) -> Self {
        Self {
            resolver: FallbackResolver::new(Arc::clone(&registry)),
            registry,
            router,
            keepalive,
        }
    }

    /// `GET /{apiKey}/[v2/]sse`
    pub fn connect(&self, api_key: &str, version: ApiVersion) -> Response<GatewayBody> {
        let (transport, body) = SseTransport::open(api_key, version, self.keepalive);

        if let Err(err) = self.router.attach(transport.as_ref()) {
            error!("Failed to connect {} SSE transport for {}: {}", version, api_key, err);
            return response::internal_error(None);
        }

        let Some(session_id) = transport.session_id() else {
            return response::internal_error(None);
        };
        let key = CompositeKey::new(api_key, session_id);
        self.registry.register(key.clone(), Arc::clone(&transport), version);
        info!("SSE session {} opened ({})", key, version);
        watch_close(Arc::clone(&self.registry), key, transport.into());

        response::sse(body)
    }

    /// `HEAD /{apiKey}/[v2/]sse`: liveness probe, no session
    pub fn head(&self) -> Response<GatewayBody> {
        let mut response = response::status_only(StatusCode::OK);
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("text/event-stream"),
        );
        response
    }

    /// `POST /{apiKey}/[v2/]messages`
    pub async fn post_message(
        &self,
        api_key: &str,
        version: ApiVersion,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response<GatewayBody> {
        // headers are consulted on the legacy path only
        let session_id = if version.allows_sse_fallback() {
            extract_session_id(query, headers).map(|(id, _)| id)
        } else {
            session_id_from_query(query)
        };
        let key = CompositeKey::new(api_key, session_id.unwrap_or_default());

        let entry = match self.resolve(&key, version) {
            Ok(entry) => entry,
            Err(candidates) => {
                return response::json(
                    StatusCode::BAD_REQUEST,
                    &json!({
                        "error": format!("No transport found for sessionId: {}", key),
                        "availableTransports": candidates,
                    }),
                );
            }
        };
        let Some(transport) = entry.transport.as_sse() else {
            return response::internal_error(None);
        };

        let mut message = match serde_json::from_slice::<Value>(&body)
            .map_err(|err| err.to_string())
            .and_then(|value| parse_json_rpc_message(value).map_err(|err| err.to_string()))
        {
            Ok(message) => message,
            Err(err) => {
                warn!("Rejected malformed message for {}: {}", entry.key, err);
                return response::error_json(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid message: {}", err),
                );
            }
        };
        inject_api_key(&mut message, api_key);

        debug!(
            "Routing {} to SSE session {}",
            message.method().unwrap_or("response"),
            entry.key
        );
        match transport.handle_post_message(message).await {
            Ok(()) => response::text(StatusCode::ACCEPTED, "Accepted"),
            Err(TransportError::Closed) => response::json(
                StatusCode::BAD_REQUEST,
                &json!({
                    "error": format!("No transport found for sessionId: {}", key),
                    "availableTransports": [],
                }),
            ),
            Err(err) => {
                error!("Failed to queue message for {}: {}", entry.key, err);
                response::error_json(StatusCode::INTERNAL_SERVER_ERROR, "SSE connection not established")
            }
        }
    }

    /// Exact lookup for the version, with fallback on the legacy path. On
    /// failure returns the caller's own SSE keys for this version.
    fn resolve(&self, key: &CompositeKey, version: ApiVersion) -> Result<SessionEntry, Vec<CompositeKey>> {
        if version.allows_sse_fallback() {
            return match self.resolver.resolve(key) {
                Resolution::Exact(entry) | Resolution::Fallback(entry) => Ok(entry),
                Resolution::Unresolved { candidates } => Err(candidates),
            };
        }

        match self.registry.lookup(key) {
            Some(entry) if entry.version == version && entry.kind() == TransportKind::Sse => Ok(entry),
            found => {
                if let Some(entry) = found {
                    warn!(
                        "Session {} is a {} {:?} session; refusing {} SSE delivery",
                        key,
                        entry.version,
                        entry.kind(),
                        version
                    );
                }
                Err(self
                    .registry
                    .list_by_version_and_api_key(version, key.api_key())
                    .into_iter()
                    .filter(|entry| entry.kind() == TransportKind::Sse)
                    .map(|entry| entry.key)
                    .collect())
            }
        }
    }
}
