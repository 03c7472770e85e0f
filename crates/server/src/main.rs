mod cli;
mod startup;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use troubleshooter_mcp::{McpServer, SseServer, StdioTransport};

use crate::cli::{ServerArgs, Transport};

fn load_config() -> troubleshooter_core::Config {
    troubleshooter_core::config::load_dotenv();
    troubleshooter_core::Config::from_env()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    let args = ServerArgs::parse();

    // stdout carries protocol frames in stdio mode, so logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    config.log_summary();

    let call_timeout = args
        .tool_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.agent.tool_timeout());
    let service = startup::build_service(call_timeout)?;
    let server = Arc::new(McpServer::new(service));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    match args.transport {
        Transport::Stdio => {
            info!("Serving MCP over stdio");
            let mut transport = StdioTransport::stdio();
            tokio::select! {
                result = server.run(&mut transport) => result.context("stdio server failed")?,
                _ = shutdown.cancelled() => {}
            }
        }
        Transport::Sse => {
            let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
            let base_url = args.base_url.unwrap_or_else(|| config.server.base_url.clone());
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            SseServer::new(server, base_url)
                .serve(listener, shutdown)
                .await
                .context("SSE server failed")?;
        }
    }

    Ok(())
}
