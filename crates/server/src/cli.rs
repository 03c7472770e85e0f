//! Command-line arguments for the tool server.

use clap::{Parser, ValueEnum};

/// MCP tool server exposing `kubectl` and `k8sgpt`.
#[derive(Parser, Debug)]
#[command(name = "troubleshooter-server", version, about = "Kubernetes troubleshooting tool server (MCP)")]
pub struct ServerArgs {
    /// Transport to serve on
    #[arg(long, value_enum, default_value_t = Transport::Sse)]
    pub transport: Transport,

    /// Listen address for SSE mode (overrides TROUBLESHOOTER_BIND)
    #[arg(long)]
    pub bind: Option<String>,

    /// Public base URL advertised to SSE clients (overrides TROUBLESHOOTER_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Per-call command timeout in seconds (overrides TROUBLESHOOTER_TOOL_TIMEOUT_SECS)
    #[arg(long)]
    pub tool_timeout_secs: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// HTTP push-stream: GET /sse + POST /message
    Sse,
}
