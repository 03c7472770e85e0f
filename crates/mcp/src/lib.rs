//! MCP (Model Context Protocol) surface of the troubleshooter.
//!
//! - **types**: JSON-RPC 2.0 and MCP message types
//! - **transport**: newline-delimited line transports (stdio, in-memory)
//! - **server**: MCP server over a `ToolService`, with per-session cancellation
//! - **sse**: push-stream front end (`GET /sse`, `POST /message`)
//! - **client**: SSE client implementing `ToolBackend` for the agent loop
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use troubleshooter_mcp::{McpServer, SseServer};
//! use troubleshooter_tool_runtime::{kubectl, ToolRegistry, ToolService};
//!
//! # async fn example() -> Result<(), troubleshooter_mcp::McpError> {
//! let mut registry = ToolRegistry::new();
//! registry.register(kubectl()).unwrap();
//! let server = Arc::new(McpServer::new(ToolService::new(registry)));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8090").await?;
//! SseServer::new(server, "http://localhost:8090")
//!     .serve(listener, tokio_util::sync::CancellationToken::new())
//!     .await
//! # }
//! ```

pub mod client;
pub mod error;
pub mod server;
pub mod sse;
pub mod transport;
pub mod types;

pub use client::{McpClient, SseEvent, SseParser};
pub use error::McpError;
pub use server::{McpServer, Session};
pub use sse::SseServer;
pub use transport::{ChannelTransport, LineTransport, McpTransport, StdioTransport};
pub use types::*;
