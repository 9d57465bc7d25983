//! Request entry point: routing, body limits, CORS, panics and timeouts

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use http_body::Body;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::{Method, Request, Response, StatusCode};
use tracing::{debug, error, warn};

use scrape_mcp_json_rpc::JsonRpcError;

use crate::cors::CorsLayer;
use crate::registry::SessionRegistry;
use crate::response::{self, GatewayBody};
use crate::router::VersionRouter;
use crate::routes::{Route, health_document, not_found_document};
use crate::server::ServerConfig;
use crate::session_manager::{McpRequest, StreamableHttpSessionManager};
use crate::sse_manager::SseConnectionManager;
use crate::transport::streamable_http::SessionIdGenerator;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

enum BodyError {
    TooLarge,
    Read(String),
}

/// Routes every inbound request to the SSE manager, the Streamable-HTTP
/// session manager, or one of the static documents.
#[derive(Debug, Clone)]
pub struct Gateway {
    sse: SseConnectionManager,
    sessions: StreamableHttpSessionManager,
    enable_cors: bool,
    max_body_size: usize,
    request_timeout: Option<Duration>,
}

impl Gateway {
    pub fn new(
        config: &ServerConfig,
        registry: Arc<SessionRegistry>,
        router: Arc<VersionRouter>,
        id_generator: SessionIdGenerator,
    ) -> Self {
        Self {
            sse: SseConnectionManager::new(
                Arc::clone(&registry),
                Arc::clone(&router),
                config.sse_keepalive_interval,
            ),
            sessions: StreamableHttpSessionManager::new(
                registry,
                router,
                id_generator,
                config.sse_keepalive_interval,
            ),
            enable_cors: config.enable_cors,
            max_body_size: config.max_body_size,
            request_timeout: config.request_timeout,
        }
    }

    /// Handle one request. Never fails: every outcome is an HTTP response
    /// with a JSON body.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!("{} {}", method, path);

        let routed = AssertUnwindSafe(self.dispatch(req)).catch_unwind();
        let outcome = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, routed).await.ok(),
            None => Some(routed.await),
        };

        let mut response = match outcome {
            Some(Ok(response)) => response,
            Some(Err(_)) => {
                error!("Unhandled panic while handling {} {}", method, path);
                response::internal_error(None)
            }
            None => {
                warn!("Request timed out: {} {}", method, path);
                response::jsonrpc_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &JsonRpcError::internal_error(None, Some("Request timed out".to_string())),
                )
            }
        };

        if self.enable_cors {
            CorsLayer::apply_cors_headers(response.headers_mut());
        }
        response
    }

    async fn dispatch<B>(&self, req: Request<B>) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        if parts.method == Method::OPTIONS {
            return response::status_only(StatusCode::NO_CONTENT);
        }

        match Route::parse(parts.uri.path()) {
            Route::Health => match parts.method {
                Method::GET | Method::HEAD => response::json(StatusCode::OK, &health_document()),
                _ => method_not_allowed(),
            },
            Route::Sse { api_key, version } => match parts.method {
                Method::GET => self.sse.connect(&api_key, version),
                Method::HEAD => self.sse.head(),
                _ => method_not_allowed(),
            },
            Route::Messages { api_key, version } => {
                if parts.method != Method::POST {
                    return method_not_allowed();
                }
                let body = match self.read_body(body).await {
                    Ok(body) => body,
                    Err(BodyError::TooLarge) => {
                        return response::error_json(
                            StatusCode::PAYLOAD_TOO_LARGE,
                            "Request body too large",
                        );
                    }
                    Err(BodyError::Read(err)) => {
                        return response::error_json(
                            StatusCode::BAD_REQUEST,
                            format!("Failed to read request body: {}", err),
                        );
                    }
                };
                self.sse
                    .post_message(&api_key, version, parts.uri.query(), &parts.headers, body)
                    .await
            }
            Route::Mcp { api_key, version } => {
                let body = match self.read_body(body).await {
                    Ok(body) => body,
                    Err(BodyError::TooLarge) => {
                        return response::jsonrpc_error(
                            StatusCode::PAYLOAD_TOO_LARGE,
                            &JsonRpcError::internal_error(
                                None,
                                Some("Request body too large".to_string()),
                            ),
                        );
                    }
                    Err(BodyError::Read(err)) => {
                        warn!("Failed to read request body: {}", err);
                        return response::jsonrpc_error(
                            StatusCode::BAD_REQUEST,
                            &JsonRpcError::parse_error(),
                        );
                    }
                };
                let request = McpRequest {
                    api_key: &api_key,
                    version,
                    method: parts.method.clone(),
                    query: parts.uri.query(),
                    headers: &parts.headers,
                };
                self.sessions.handle(request, body).await
            }
            Route::NotFound => response::json(StatusCode::NOT_FOUND, &not_found_document()),
        }
    }

    async fn read_body<B>(&self, body: B) -> Result<Bytes, BodyError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        match Limited::new(body, self.max_body_size).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => Err(BodyError::TooLarge),
            Err(err) => Err(BodyError::Read(err.to_string())),
        }
    }
}

fn method_not_allowed() -> Response<GatewayBody> {
    response::error_json(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}
