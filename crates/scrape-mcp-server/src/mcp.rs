//! Per-version MCP method handling
//!
//! One [`ScrapeMcpHandler`] per version serves `initialize`, `ping`,
//! `tools/list` and `tools/call`. It keeps no session state; the caller's
//! API key arrives in `params._meta.apiKey` on every request.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use scrape_mcp_gateway::transport::API_KEY_META;
use scrape_mcp_gateway::{ApiVersion, JsonRpcDispatcher, JsonRpcHandler, McpBackend, SessionContext};
use scrape_mcp_json_rpc::{JsonRpcErrorObject, RequestParams, ToJsonRpcError};

use crate::scrape_api::{ApiAuth, ScrapeApi};
use crate::tools::{call_tool, list_tools};

/// Protocol revisions this server can speak, oldest first
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2024-11-05", "2025-03-26", "2025-06-18"];

pub const SERVER_NAME: &str = "scrape-mcp";

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Method not supported: {0}")]
    UnsupportedMethod(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl McpError {
    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        match self {
            McpError::ToolNotFound(name) => {
                JsonRpcErrorObject::invalid_params(&format!("Unknown tool: {}", name))
            }
            McpError::InvalidParameters(msg) => JsonRpcErrorObject::invalid_params(msg),
            McpError::MissingParameter(param) => JsonRpcErrorObject::invalid_params(&format!(
                "Missing required parameter: {}",
                param
            )),
            McpError::UnsupportedMethod(method) => JsonRpcErrorObject::method_not_found(method),
            McpError::Serialization(err) => {
                JsonRpcErrorObject::internal_error(Some(format!("Serialization error: {}", err)))
            }
        }
    }
}

impl ToJsonRpcError for McpError {
    fn to_error_object(&self) -> JsonRpcErrorObject {
        McpError::to_error_object(self)
    }
}

/// Pick the protocol revision to answer `initialize` with
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|requested| {
            SUPPORTED_PROTOCOL_VERSIONS
                .into_iter()
                .find(|supported| *supported == requested)
        })
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[SUPPORTED_PROTOCOL_VERSIONS.len() - 1])
}

pub struct ScrapeMcpHandler {
    version: ApiVersion,
    api: Arc<dyn ScrapeApi>,
}

impl ScrapeMcpHandler {
    pub fn new(version: ApiVersion, api: Arc<dyn ScrapeApi>) -> Self {
        Self { version, api }
    }

    /// `_meta.apiKey` from the request, else the transport's key
    fn auth(&self, params: Option<&RequestParams>, session: &SessionContext) -> ApiAuth {
        let api_key = params
            .and_then(|params| params.meta(API_KEY_META))
            .or_else(|| session.metadata.get(API_KEY_META))
            .and_then(Value::as_str)
            .map(str::to_string);
        ApiAuth::new(self.version, api_key)
    }

    fn initialize(&self, params: Option<&RequestParams>) -> Value {
        let requested = params
            .and_then(|params| params.get("protocolVersion"))
            .and_then(Value::as_str);
        json!({
            "protocolVersion": negotiate_protocol_version(requested),
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": format!("{}-{}", SERVER_NAME, self.version),
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    async fn call(
        &self,
        params: Option<RequestParams>,
        session: &SessionContext,
    ) -> Result<Value, McpError> {
        let auth = self.auth(params.as_ref(), session);
        let Some(RequestParams::Object(mut params)) = params else {
            return Err(McpError::InvalidParameters(
                "tools/call expects an object".to_string(),
            ));
        };

        let name = match params.remove("name") {
            Some(Value::String(name)) => name,
            Some(_) => return Err(McpError::InvalidParameters("'name' must be a string".into())),
            None => return Err(McpError::MissingParameter("name".to_string())),
        };
        let arguments = match params.remove("arguments") {
            Some(Value::Object(arguments)) => arguments,
            None | Some(Value::Null) => Map::new(),
            Some(_) => {
                return Err(McpError::InvalidParameters(
                    "'arguments' must be an object".into(),
                ));
            }
        };

        let result = call_tool(self.api.as_ref(), &auth, &name, arguments).await?;
        Ok(serde_json::to_value(result)?)
    }
}

#[async_trait]
impl JsonRpcHandler for ScrapeMcpHandler {
    type Error = McpError;

    async fn handle(
        &self,
        method: &str,
        params: Option<RequestParams>,
        session: &SessionContext,
    ) -> Result<Value, Self::Error> {
        debug!("{} {} (session {})", self.version, method, session.session_id);
        match method {
            "initialize" => Ok(self.initialize(params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": list_tools(self.version) })),
            "tools/call" => self.call(params, session).await,
            other => Err(McpError::UnsupportedMethod(other.to_string())),
        }
    }

    async fn handle_notification(
        &self,
        method: &str,
        _params: Option<RequestParams>,
        session: &SessionContext,
    ) -> Result<(), Self::Error> {
        debug!("{} notification {} (session {})", self.version, method, session.session_id);
        Ok(())
    }

    fn supported_methods(&self) -> Vec<String> {
        ["initialize", "ping", "tools/list", "tools/call", "notifications/initialized"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}

/// JSON-RPC dispatcher serving the tools of one version
pub fn dispatcher(version: ApiVersion, api: Arc<dyn ScrapeApi>) -> JsonRpcDispatcher<McpError> {
    let mut dispatcher = JsonRpcDispatcher::new();
    dispatcher.register(ScrapeMcpHandler::new(version, api));
    dispatcher
}

/// Backend for `version`, ready to hand to the gateway builder
pub fn backend(version: ApiVersion, api: Arc<dyn ScrapeApi>) -> McpBackend {
    McpBackend::new(version, dispatcher(version, api))
}
