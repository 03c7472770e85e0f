//! Push-stream (SSE) front end.
//!
//! `GET /sse` opens a session. Its first event is `endpoint`, carrying the URL
//! to which the client POSTs JSON-RPC messages. Responses are pushed back on
//! the session's stream as `message` events. Dropping the stream ends the
//! session and cancels every call still running on it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::routing::{get, post};
use axum::Router;
use futures::Stream;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::server::{Incoming, McpServer, Session};
use crate::types::JsonRpcResponse;

const SESSION_BUFFER: usize = 64;

struct SessionHandle {
    tx: mpsc::Sender<Event>,
    session: Arc<Session>,
}

type SessionMap = Arc<Mutex<HashMap<String, SessionHandle>>>;

/// SSE server state, cheap to clone.
#[derive(Clone)]
pub struct SseServer {
    server: Arc<McpServer>,
    base_url: String,
    sessions: SessionMap,
    keep_alive: Duration,
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

impl SseServer {
    /// `base_url` is the externally reachable origin advertised in the
    /// `endpoint` event, e.g. `http://localhost:8090`.
    pub fn new(server: Arc<McpServer>, base_url: impl Into<String>) -> Self {
        Self {
            server,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            keep_alive: Duration::from_secs(15),
        }
    }

    /// Interval between keep-alive comments. A closed client is noticed on
    /// the next write, so this also bounds how long a dead session lingers.
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/sse", get(open_stream))
            .route("/message", post(post_message))
            .layer(CorsLayer::permissive())
            .with_state(self.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Calls currently running across all sessions.
    pub fn in_flight(&self) -> usize {
        self.sessions
            .lock()
            .map(|s| s.values().map(|h| h.session.in_flight()).sum::<usize>())
            .unwrap_or(0)
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), McpError> {
        let addr = listener.local_addr()?;
        info!(%addr, base_url = %self.base_url, "SSE server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        info!("SSE server stopped");
        Ok(())
    }

    fn session(&self, id: &str) -> Option<(mpsc::Sender<Event>, Arc<Session>)> {
        let sessions = self.sessions.lock().ok()?;
        sessions
            .get(id)
            .map(|h| (h.tx.clone(), Arc::clone(&h.session)))
    }
}

/// Removes the session and cancels its calls when the client goes away.
struct SessionGuard {
    id: String,
    sessions: SessionMap,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let removed = self
            .sessions
            .lock()
            .ok()
            .and_then(|mut sessions| sessions.remove(&self.id));
        if let Some(handle) = removed {
            handle.session.close();
            info!(session_id = %self.id, "SSE session closed");
        }
    }
}

struct SessionStream {
    events: ReceiverStream<Event>,
    _guard: SessionGuard,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx).map(|e| e.map(Ok))
    }
}

async fn open_stream(State(state): State<SseServer>) -> Sse<KeepAliveStream<SessionStream>> {
    let id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel(SESSION_BUFFER);

    let endpoint = format!("{}/message?sessionId={}", state.base_url, id);
    // Fresh channel with spare capacity; this cannot fail.
    let _ = tx.try_send(Event::default().event("endpoint").data(endpoint));

    if let Ok(mut sessions) = state.sessions.lock() {
        sessions.insert(
            id.clone(),
            SessionHandle {
                tx,
                session: Arc::new(Session::new()),
            },
        );
    }
    info!(session_id = %id, "SSE session opened");

    let stream = SessionStream {
        events: ReceiverStream::new(rx),
        _guard: SessionGuard {
            id,
            sessions: Arc::clone(&state.sessions),
        },
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive))
}

async fn post_message(
    State(state): State<SseServer>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> (StatusCode, &'static str) {
    let Some((tx, session)) = state.session(&query.session_id) else {
        warn!(session_id = %query.session_id, "message for unknown session");
        return (StatusCode::NOT_FOUND, "unknown session");
    };
    debug!(session_id = %query.session_id, message = %body, "Received message");

    match McpServer::parse_message(&body) {
        Ok(Incoming::Notification(notif)) => {
            state.server.handle_notification(&session, &notif);
        }
        Ok(Incoming::Request(request)) => {
            let server = Arc::clone(&state.server);
            tokio::spawn(async move {
                let response = server.handle_request(&session, &request).await;
                push(&tx, &response).await;
            });
        }
        Err(response) => push(&tx, &response).await,
    }
    (StatusCode::ACCEPTED, "Accepted")
}

async fn push(tx: &mpsc::Sender<Event>, response: &JsonRpcResponse) {
    let json = match serde_json::to_string(response) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to encode response");
            return;
        }
    };
    if tx.send(Event::default().event("message").data(json)).await.is_err() {
        debug!(id = ?response.id, "session closed before response could be pushed");
    }
}
