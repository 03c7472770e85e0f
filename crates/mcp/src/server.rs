//! MCP server over the tool service.
//!
//! The server itself is stateless and shared; per-connection state (the
//! cancellation scope and the calls in flight) lives in a [`Session`]. The
//! stdio loop drives one session sequentially, the SSE front end drives many
//! sessions with one task per request.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use troubleshooter_tool_runtime::ToolService;

use crate::error::McpError;
use crate::transport::McpTransport;
use crate::types::*;

/// A parsed inbound message.
#[derive(Debug)]
pub enum Incoming {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

/// Per-connection state.
///
/// Every `tools/call` runs under a child of the session token, registered
/// under its request id until it finishes. Tool methods are refused until the
/// session has seen `initialize`.
#[derive(Debug, Default)]
pub struct Session {
    cancel: CancellationToken,
    in_flight: Mutex<HashMap<RpcId, CancellationToken>>,
    initialized: AtomicBool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn require_initialized(&self) -> Result<(), McpError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(McpError::NotInitialized)
        }
    }

    fn begin(&self, id: &RpcId) -> CancellationToken {
        let token = self.cancel.child_token();
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(id.clone(), token.clone());
        }
        token
    }

    fn finish(&self, id: &RpcId) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(id);
        }
    }

    /// Cancel one in-flight call. Returns false if no such call is running.
    pub fn cancel_request(&self, id: &RpcId) -> bool {
        let token = self
            .in_flight
            .lock()
            .ok()
            .and_then(|in_flight| in_flight.get(id).cloned());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Cancel everything still running on this session.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// MCP server exposing a [`ToolService`].
pub struct McpServer {
    service: ToolService,
    info: ImplementationInfo,
}

impl McpServer {
    pub const DEFAULT_NAME: &'static str = "kubernetes-troubleshooter";
    pub const DEFAULT_VERSION: &'static str = "1.0.0";

    pub fn new(service: ToolService) -> Self {
        Self {
            service,
            info: ImplementationInfo {
                name: Self::DEFAULT_NAME.to_string(),
                version: Self::DEFAULT_VERSION.to_string(),
            },
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    pub fn info(&self) -> &ImplementationInfo {
        &self.info
    }

    /// Serve one session over a line transport until the peer closes it.
    ///
    /// Requests are handled one at a time, in arrival order.
    pub async fn run<T: McpTransport>(&self, transport: &mut T) -> Result<(), McpError> {
        info!(server = %self.info.name, "MCP server starting");
        let session = Session::new();

        while let Some(line) = transport.receive().await? {
            debug!(message = %line, "Received message");
            if let Some(response) = self.handle_message(&session, &line).await {
                let json = serde_json::to_string(&response)?;
                transport.send(&json).await?;
            }
        }

        info!("Transport closed, shutting down");
        session.close();
        Ok(())
    }

    /// Split a raw message into a request or notification. A malformed
    /// message yields the error response to send back.
    pub fn parse_message(line: &str) -> Result<Incoming, Box<JsonRpcResponse>> {
        let parse_failure = |e: serde_json::Error| {
            warn!(error = %e, "Failed to parse JSON-RPC message");
            Box::new(JsonRpcResponse::failure(None, McpError::JsonParse(e).to_rpc_error()))
        };

        let raw: Value = serde_json::from_str(line).map_err(parse_failure)?;
        if raw.get("id").is_none() {
            return serde_json::from_value(raw)
                .map(Incoming::Notification)
                .map_err(parse_failure);
        }
        serde_json::from_value(raw)
            .map(Incoming::Request)
            .map_err(parse_failure)
    }

    /// Handle one raw message, returning the response to send, if any.
    pub async fn handle_message(&self, session: &Session, line: &str) -> Option<JsonRpcResponse> {
        match Self::parse_message(line) {
            Ok(Incoming::Request(request)) => Some(self.handle_request(session, &request).await),
            Ok(Incoming::Notification(notif)) => {
                self.handle_notification(session, &notif);
                None
            }
            Err(response) => Some(*response),
        }
    }

    pub async fn handle_request(&self, session: &Session, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let result = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(session, &request.params),
            methods::TOOLS_LIST => match session.require_initialized() {
                Ok(()) => self.handle_list_tools(),
                Err(e) => Err(e),
            },
            methods::TOOLS_CALL => match session.require_initialized() {
                Ok(()) => self.handle_call_tool(session, &id, &request.params).await,
                Err(e) => Err(e),
            },
            method => {
                warn!(method = %method, "Unknown method");
                Err(McpError::MethodNotFound(method.to_string()))
            }
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                debug!(request_id = %id, error = %e, "Request failed");
                JsonRpcResponse::failure(Some(id), e.to_rpc_error())
            }
        }
    }

    pub fn handle_notification(&self, session: &Session, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            methods::INITIALIZED => info!("Client confirmed initialization"),
            methods::CANCELLED => {
                let params = notif
                    .params
                    .clone()
                    .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok());
                match params {
                    Some(params) => {
                        let found = session.cancel_request(&params.request_id);
                        info!(request_id = %params.request_id, found, reason = ?params.reason, "Client cancelled a request");
                    }
                    None => warn!("notifications/cancelled without a valid requestId"),
                }
            }
            method => debug!(method = %method, "Unknown notification, ignoring"),
        }
    }

    fn handle_initialize(&self, session: &Session, params: &Option<Value>) -> Result<Value, McpError> {
        if let Some(params) = params
            .clone()
            .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok())
        {
            info!(
                client = %params.client_info.name,
                client_version = %params.client_info.version,
                protocol = %params.protocol_version,
                "Handling initialize"
            );
        }

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: self.info.clone(),
        };
        session.mark_initialized();
        Ok(serde_json::to_value(result)?)
    }

    fn handle_list_tools(&self) -> Result<Value, McpError> {
        let tools: Vec<ToolInfo> = self
            .service
            .list_tools()
            .into_iter()
            .map(ToolInfo::from)
            .collect();
        debug!(count = tools.len(), "Handling tools/list");
        Ok(serde_json::to_value(ListToolsResult { tools })?)
    }

    async fn handle_call_tool(
        &self,
        session: &Session,
        id: &RpcId,
        params: &Option<Value>,
    ) -> Result<Value, McpError> {
        let params = params
            .clone()
            .ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
        let call: CallToolParams =
            serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))?;

        info!(request_id = %id, tool = %call.name, "Handling tools/call");
        let token = session.begin(id);
        let outcome = self.service.call(&call.name, call.arguments, &token).await;
        session.finish(id);

        let output = outcome.map_err(McpError::from)?;
        Ok(serde_json::to_value(CallToolResult::text(output))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use serde_json::json;
    use troubleshooter_tool_runtime::{ExternalCommandTool, ToolRegistry};

    fn test_server() -> McpServer {
        let mut registry = ToolRegistry::new();
        registry
            .register(ExternalCommandTool::new("echo", "echo", "Prints its arguments"))
            .unwrap();
        registry
            .register(ExternalCommandTool::new("sleep", "sleep", "Waits"))
            .unwrap();
        registry
            .register(ExternalCommandTool::new("false", "false", "Always fails"))
            .unwrap();
        McpServer::new(ToolService::new(registry))
    }

    /// A session that has completed the handshake.
    fn ready_session() -> Session {
        let session = Session::new();
        session.mark_initialized();
        session
    }

    fn call(id: i64, name: &str, arguments: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(
            RpcId::Number(id),
            methods::TOOLS_CALL,
            Some(json!({"name": name, "arguments": arguments})),
        )
    }

    #[tokio::test]
    async fn test_initialize_reports_server_info() {
        let server = test_server().with_name("test-server");
        let req = JsonRpcRequest::new(
            RpcId::Number(1),
            methods::INITIALIZE,
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "0.0.1"}
            })),
        );

        let session = Session::new();
        let resp = server.handle_request(&session, &req).await;
        let result: InitializeResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert_eq!(result.server_info.name, "test-server");
        assert_eq!(result.server_info.version, "1.0.0");
        assert!(result.capabilities.tools.is_some());
        assert!(session.is_initialized());
    }

    #[test]
    fn test_default_server_info() {
        let info = test_server().info().clone();
        assert_eq!(info.name, "kubernetes-troubleshooter");
        assert_eq!(info.version, "1.0.0");
    }

    #[tokio::test]
    async fn test_tool_methods_refused_before_initialize() {
        let server = test_server();
        let session = Session::new();

        let list = JsonRpcRequest::new(RpcId::Number(1), methods::TOOLS_LIST, None);
        let err = server.handle_request(&session, &list).await.error.unwrap();
        assert_eq!(err.code, error_codes::INVALID_REQUEST);
        assert_eq!(err.message, "not initialized: call initialize first");

        let resp = server
            .handle_request(&session, &call(2, "echo", json!({"arguments": "early"})))
            .await;
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_REQUEST);
        assert_eq!(session.in_flight(), 0);

        let init = JsonRpcRequest::new(RpcId::Number(3), methods::INITIALIZE, None);
        assert!(server.handle_request(&session, &init).await.error.is_none());
        let resp = server.handle_request(&session, &list).await;
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_list_tools_in_registration_order() {
        let server = test_server();
        let req = JsonRpcRequest::new(RpcId::Number(2), methods::TOOLS_LIST, None);
        let resp = server.handle_request(&ready_session(), &req).await;
        let result: ListToolsResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        let names: Vec<_> = result.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "sleep", "false"]);
        assert_eq!(result.tools[0].input_schema["required"], json!(["arguments"]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_returns_text_content() {
        let server = test_server();
        let resp = server
            .handle_request(&ready_session(), &call(3, "echo", json!({"arguments": "hello mcp"})))
            .await;
        assert!(resp.error.is_none());
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.joined_text(), "hello mcp");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_failure_is_internal_error_with_classified_text() {
        let server = test_server();
        let resp = server
            .handle_request(&ready_session(), &call(4, "false", json!({"arguments": ""})))
            .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::INTERNAL_ERROR);
        assert_eq!(err.message, "false exited with code 1: ");
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments_are_invalid_params() {
        let server = test_server();
        let session = ready_session();

        let resp = server
            .handle_request(&session, &call(5, "helm", json!({"arguments": "list"})))
            .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);
        assert_eq!(err.message, "unknown tool: helm");

        let resp = server
            .handle_request(&session, &call(6, "echo", json!({"args": "x"})))
            .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::INVALID_PARAMS);
        assert_eq!(
            err.message,
            "invalid arguments: missing or invalid 'arguments' string for echo"
        );

        let no_params = JsonRpcRequest::new(RpcId::Number(7), methods::TOOLS_CALL, None);
        let resp = server.handle_request(&session, &no_params).await;
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = test_server();
        let req = JsonRpcRequest::new(RpcId::Number(8), "resources/list", None);
        let resp = server.handle_request(&Session::new(), &req).await;
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_message_is_parse_error() {
        let server = test_server();
        let resp = server
            .handle_message(&Session::new(), "{not json")
            .await
            .unwrap();
        assert!(resp.id.is_none());
        assert_eq!(resp.error.unwrap().code, error_codes::PARSE_ERROR);
        let wire = serde_json::to_value(
            server.handle_message(&Session::new(), "[1,").await.unwrap(),
        )
        .unwrap();
        assert_eq!(wire["id"], Value::Null);

        let none = server
            .handle_message(&Session::new(), r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(none.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_notification_stops_running_call() {
        let server = std::sync::Arc::new(test_server());
        let session = std::sync::Arc::new(ready_session());

        let running = {
            let server = server.clone();
            let session = session.clone();
            tokio::spawn(async move {
                server
                    .handle_request(&session, &call(9, "sleep", json!({"arguments": "30"})))
                    .await
            })
        };

        while session.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        let started = std::time::Instant::now();
        let notif = JsonRpcNotification::new(
            methods::CANCELLED,
            Some(json!({"requestId": 9, "reason": "client timeout"})),
        );
        server.handle_notification(&session, &notif);

        let resp = running.await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::INTERNAL_ERROR);
        assert!(err.message.contains("cancelled"), "{}", err.message);
        assert_eq!(session.in_flight(), 0);
    }

    #[test]
    fn test_cancel_unknown_request_is_noop() {
        let session = Session::new();
        assert!(!session.cancel_request(&RpcId::Number(1)));
        session.close();
        assert!(session.is_closed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_over_channel_transport() {
        let (mut client_side, mut server_side) = ChannelTransport::pair();
        let server = test_server();
        let handle = tokio::spawn(async move { server.run(&mut server_side).await });

        let init = JsonRpcRequest::new(
            RpcId::Number(1),
            methods::INITIALIZE,
            Some(json!({"protocolVersion": PROTOCOL_VERSION, "clientInfo": {"name": "t"}})),
        );
        client_side
            .send(&serde_json::to_string(&init).unwrap())
            .await
            .unwrap();
        let resp: JsonRpcResponse =
            serde_json::from_str(&client_side.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(resp.id, Some(RpcId::Number(1)));
        assert!(resp.error.is_none());

        let initialized = JsonRpcNotification::new(methods::INITIALIZED, None);
        client_side
            .send(&serde_json::to_string(&initialized).unwrap())
            .await
            .unwrap();

        let req = call(2, "echo", json!({"arguments": "via transport"}));
        client_side
            .send(&serde_json::to_string(&req).unwrap())
            .await
            .unwrap();
        let resp: JsonRpcResponse =
            serde_json::from_str(&client_side.receive().await.unwrap().unwrap()).unwrap();
        assert_eq!(resp.id, Some(RpcId::Number(2)));
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.joined_text(), "via transport");

        drop(client_side);
        handle.await.unwrap().unwrap();
    }
}
