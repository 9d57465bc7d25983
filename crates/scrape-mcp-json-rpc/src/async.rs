use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::{JsonRpcError, JsonRpcErrorObject},
    message::JsonRpcMessage,
    notification::JsonRpcNotification,
    request::{JsonRpcRequest, RequestParams},
    response::{JsonRpcReply, JsonRpcResponse},
};

/// Per-call context handed to handlers by the transport that received the message
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Session identifier assigned by the transport
    pub session_id: String,
    /// Transport-level metadata (the caller's API key, protocol generation)
    pub metadata: HashMap<String, Value>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Trait for handling JSON-RPC method calls
#[async_trait]
pub trait JsonRpcHandler: Send + Sync {
    /// The error type returned by this handler
    type Error: ToJsonRpcError;

    /// Handle a method call. Domain errors are converted by the dispatcher.
    async fn handle(
        &self,
        method: &str,
        params: Option<RequestParams>,
        session: &SessionContext,
    ) -> Result<Value, Self::Error>;

    /// Handle a notification (default: ignore)
    async fn handle_notification(
        &self,
        method: &str,
        params: Option<RequestParams>,
        session: &SessionContext,
    ) -> Result<(), Self::Error> {
        let _ = (method, params, session);
        Ok(())
    }

    /// Methods this handler serves
    fn supported_methods(&self) -> Vec<String> {
        vec![]
    }
}

/// Trait for errors that can be converted to JSON-RPC error objects
pub trait ToJsonRpcError: std::error::Error + Send + Sync + 'static {
    fn to_error_object(&self) -> JsonRpcErrorObject;
}

/// Method-name routed dispatcher over a fixed error type
pub struct JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    handlers: HashMap<String, Arc<dyn JsonRpcHandler<Error = E>>>,
    default_handler: Option<Arc<dyn JsonRpcHandler<Error = E>>>,
}

impl<E> JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_handler: None,
        }
    }

    /// Register one handler for every method it reports as supported
    pub fn register<H>(&mut self, handler: H)
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        let methods = handler.supported_methods();
        self.register_methods(methods, handler);
    }

    /// Register a handler for an explicit list of methods
    pub fn register_methods<H>(&mut self, methods: Vec<String>, handler: H)
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        let handler: Arc<dyn JsonRpcHandler<Error = E>> = Arc::new(handler);
        for method in methods {
            self.handlers.insert(method, Arc::clone(&handler));
        }
    }

    /// Set a fallback handler for unregistered methods
    pub fn set_default_handler<H>(&mut self, handler: H)
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        self.default_handler = Some(Arc::new(handler));
    }

    fn handler_for(&self, method: &str) -> Option<&Arc<dyn JsonRpcHandler<Error = E>>> {
        self.handlers.get(method).or(self.default_handler.as_ref())
    }

    /// Process a request and produce exactly one reply
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        session: &SessionContext,
    ) -> JsonRpcReply {
        let Some(handler) = self.handler_for(&request.method) else {
            return JsonRpcError::method_not_found(request.id, &request.method).into();
        };

        match handler.handle(&request.method, request.params, session).await {
            Ok(result) => JsonRpcResponse::success(request.id, result).into(),
            Err(domain_error) => {
                JsonRpcError::new(Some(request.id), domain_error.to_error_object()).into()
            }
        }
    }

    /// Process a notification. Unknown methods are ignored.
    pub async fn handle_notification(
        &self,
        notification: JsonRpcNotification,
        session: &SessionContext,
    ) -> Result<(), E> {
        match self.handler_for(&notification.method) {
            Some(handler) => {
                handler
                    .handle_notification(&notification.method, notification.params, session)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Process any inbound message; only requests produce a reply
    pub async fn handle_message(
        &self,
        message: JsonRpcMessage,
        session: &SessionContext,
    ) -> Result<Option<JsonRpcReply>, E> {
        match message {
            JsonRpcMessage::Request(request) => {
                Ok(Some(self.handle_request(request, session).await))
            }
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification, session).await?;
                Ok(None)
            }
            JsonRpcMessage::Response(_) => Ok(None),
        }
    }

    pub fn registered_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }
}

impl<E> Default for JsonRpcDispatcher<E>
where
    E: ToJsonRpcError,
{
    fn default() -> Self {
        Self::new()
    }
}
