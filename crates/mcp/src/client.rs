//! MCP client over the push-stream (SSE) transport.
//!
//! Opens `GET {endpoint}`, waits for the `endpoint` event naming the message
//! URL, then POSTs requests there. A background reader task routes pushed
//! `message` events to the waiting caller by request id.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use troubleshooter_tool_runtime::{ToolBackend, ToolCallError, ToolDefinition};

use crate::error::McpError;
use crate::types::*;

/// Requests awaiting a pushed response. Once the event stream has ended,
/// `closed` is set and no new waiter may be registered.
#[derive(Default)]
struct PendingState {
    waiters: HashMap<RpcId, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

type Pending = Arc<Mutex<PendingState>>;

/// A connected MCP client session.
pub struct McpClient {
    http: reqwest::Client,
    message_url: String,
    pending: Pending,
    next_id: AtomicI64,
    server_info: ImplementationInfo,
    reader: JoinHandle<()>,
}

impl McpClient {
    /// Connect to `endpoint` (e.g. `http://localhost:8090/sse`) and complete
    /// the `initialize` handshake.
    pub async fn connect(endpoint: &str) -> Result<Self, McpError> {
        info!(endpoint = %endpoint, "Connecting to MCP server");
        let http = reqwest::Client::new();

        let resp = http
            .get(endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(McpError::ServerUnavailable(format!(
                "{endpoint} returned {}",
                resp.status()
            )));
        }

        let mut events = SseParser::new(resp.bytes_stream());
        let message_url = loop {
            match events.next().await {
                Some(Ok(event)) if event.event == "endpoint" => {
                    break resolve_endpoint(endpoint, event.data.trim())?;
                }
                Some(Ok(event)) => debug!(event = %event.event, "ignoring event before endpoint"),
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(McpError::ServerUnavailable(
                        "event stream closed before endpoint was announced".to_string(),
                    ))
                }
            }
        };
        debug!(message_url = %message_url, "Session endpoint received");

        let pending: Pending = Arc::new(Mutex::new(PendingState::default()));
        let reader = tokio::spawn(read_responses(events, Arc::clone(&pending)));

        let mut client = Self {
            http,
            message_url,
            pending,
            next_id: AtomicI64::new(1),
            server_info: ImplementationInfo {
                name: String::new(),
                version: String::new(),
            },
            reader,
        };
        client.initialize().await?;
        Ok(client)
    }

    pub fn server_info(&self) -> &ImplementationInfo {
        &self.server_info
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "k8s-troubleshooter-client",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result: InitializeResult =
            serde_json::from_value(self.request(methods::INITIALIZE, Some(params)).await?)?;
        self.notify(methods::INITIALIZED, None).await?;

        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "MCP client initialized"
        );
        self.server_info = result.server_info;
        Ok(())
    }

    /// Send a request and wait for its pushed response.
    ///
    /// Dropping the returned future withdraws the request and sends
    /// `notifications/cancelled` for it.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = RpcId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| McpError::ServerUnavailable("pending request table poisoned".to_string()))?;
            if pending.closed {
                return Err(McpError::ServerUnavailable("event stream closed".to_string()));
            }
            pending.waiters.insert(id.clone(), tx);
        }
        let mut guard = InFlight {
            id: id.clone(),
            pending: Arc::clone(&self.pending),
            http: self.http.clone(),
            message_url: self.message_url.clone(),
            armed: true,
        };

        debug!(method = %method, id = %id, "Sending request");
        let request = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.post(&serde_json::to_value(&request)?).await {
            guard.armed = false;
            return Err(e);
        }

        let response = rx.await.map_err(|_| {
            McpError::ServerUnavailable("event stream closed while awaiting response".to_string())
        })?;
        guard.armed = false;

        if let Some(err) = response.error {
            return Err(err.into());
        }
        response
            .result
            .ok_or_else(|| McpError::ServerUnavailable("response carried no result".to_string()))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notif = JsonRpcNotification::new(method, params);
        self.post(&serde_json::to_value(&notif)?).await
    }

    async fn post(&self, body: &Value) -> Result<(), McpError> {
        let resp = self.http.post(&self.message_url).json(body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(McpError::ServerUnavailable(format!("message endpoint returned {status}: {text}")));
        }
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        let result: ListToolsResult =
            serde_json::from_value(self.request(methods::TOOLS_LIST, None).await?)?;
        info!(count = result.tools.len(), "Tool discovery complete");
        Ok(result.tools)
    }

    /// Call a remote tool, returning its text output.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result: CallToolResult =
            serde_json::from_value(self.request(methods::TOOLS_CALL, Some(params)).await?)?;
        let text = result.joined_text();
        if result.is_error {
            return Err(McpError::ToolExecution(text));
        }
        Ok(text)
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl ToolBackend for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolCallError> {
        McpClient::list_tools(self)
            .await
            .map(|tools| tools.into_iter().map(ToolDefinition::from).collect())
            .map_err(|e| ToolCallError::Transport(e.to_string()))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolCallError> {
        McpClient::call_tool(self, name, arguments)
            .await
            .map_err(|e| match e {
                McpError::Rpc { message, .. } | McpError::ToolExecution(message) => {
                    ToolCallError::Failed(message)
                }
                other => ToolCallError::Transport(other.to_string()),
            })
    }
}

/// Withdraws an abandoned request and tells the server to stop working on it.
struct InFlight {
    id: RpcId,
    pending: Pending,
    http: reqwest::Client,
    message_url: String,
    armed: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.waiters.remove(&self.id);
        }
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let notif = JsonRpcNotification::new(
            methods::CANCELLED,
            Some(json!({ "requestId": self.id, "reason": "request abandoned by client" })),
        );
        let http = self.http.clone();
        let url = self.message_url.clone();
        let id = self.id.clone();
        debug!(id = %id, "Cancelling abandoned request");
        runtime.spawn(async move {
            if let Err(e) = http.post(&url).json(&notif).send().await {
                warn!(id = %id, error = %e, "failed to send cancellation");
            }
        });
    }
}

async fn read_responses<S>(mut events: SseParser<S>, pending: Pending)
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "event stream failed");
                break;
            }
        };
        if event.event != "message" {
            debug!(event = %event.event, "ignoring event");
            continue;
        }
        let response: JsonRpcResponse = match serde_json::from_str(&event.data) {
            Ok(response) => response,
            Err(e) => {
                debug!(data = %event.data, error = %e, "pushed message is not a response");
                continue;
            }
        };
        let waiter = match (&response.id, pending.lock()) {
            (Some(id), Ok(mut pending)) => pending.waiters.remove(id),
            _ => None,
        };
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(id = ?response.id, "response for unknown or abandoned request"),
        }
    }

    info!("Event stream closed");
    // Dropping the senders fails every waiting request; later ones are refused.
    if let Ok(mut pending) = pending.lock() {
        pending.closed = true;
        pending.waiters.clear();
    }
}

fn resolve_endpoint(base: &str, announced: &str) -> Result<String, McpError> {
    let base = reqwest::Url::parse(base)
        .map_err(|e| McpError::ServerUnavailable(format!("invalid endpoint {base}: {e}")))?;
    base.join(announced)
        .map(|url| url.to_string())
        .map_err(|e| McpError::ServerUnavailable(format!("invalid message endpoint {announced}: {e}")))
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Parses an SSE byte stream into events.
///
/// ```text
/// event: endpoint
/// data: /message?sessionId=…
///
/// event: message
/// data: {"jsonrpc":"2.0","id":1,"result":{…}}
///
/// ```
pub struct SseParser<S> {
    inner: S,
    /// Raw bytes; only complete lines are decoded, so a UTF-8 sequence split
    /// across chunks survives.
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
}

impl<S> SseParser<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            event: None,
            data: Vec::new(),
        }
    }

    /// Consume complete lines from the buffer until an event is dispatched.
    fn try_parse_event(&mut self) -> Option<SseEvent> {
        loop {
            let line_end = self.buffer.iter().position(|&b| b == b'\n')?;
            let raw = self.buffer.split_to(line_end + 1);
            let decoded = String::from_utf8_lossy(&raw[..line_end]);
            let line = decoded.trim_end_matches('\r');

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    return Some(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                // id:, retry: and unknown fields
                _ => {}
            }
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

impl<S, E> Stream for SseParser<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<McpError>,
{
    type Item = Result<SseEvent, McpError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.try_parse_event() {
                return Poll::Ready(Some(Ok(event)));
            }

            match self.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e.into()))),
                Poll::Ready(None) => {
                    // A trailing event without its blank line is still delivered.
                    if !self.buffer.is_empty() {
                        self.buffer.extend_from_slice(b"\n");
                        if let Some(event) = self.try_parse_event() {
                            return Poll::Ready(Some(Ok(event)));
                        }
                    }
                    return Poll::Ready(self.dispatch().map(Ok));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
