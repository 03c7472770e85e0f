mod cli;
mod console;
mod terminal;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::tty::IsTty;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use troubleshooter_core::Config;
use troubleshooter_mcp::McpClient;
use troubleshooter_tool_runtime::{AgenticLoop, ToolBackend};

use crate::cli::CliArgs;
use crate::console::Console;
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    troubleshooter_core::config::load_dotenv();

    // Logs go to stderr so they never interleave with the console on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let mut config = Config::from_env();
    if let Some(endpoint) = args.endpoint {
        config.client.mcp_endpoint = endpoint;
    }
    if let Some(model) = args.model {
        config.llm.openai_model = model;
    }
    if let Some(key) = args.api_key {
        config.llm.openai_api_key = Some(key);
    }
    if let Some(max) = args.max_iterations {
        config.agent.max_iterations = max;
    }
    config.log_summary();

    let stdout = std::io::stdout();
    let colored = !args.no_color && stdout.is_tty();
    let mut terminal = Terminal::new(stdout, colored);

    let client = McpClient::connect(&config.client.mcp_endpoint)
        .await
        .with_context(|| format!("failed to initialize MCP client at {}", config.client.mcp_endpoint))?;
    terminal.print_connected(client.server_info())?;

    let provider = troubleshooter_llm::create_provider(&config.llm)
        .context("failed to create LLM provider (is OPENAI_API_KEY set?)")?;

    let backend: Arc<dyn ToolBackend> = Arc::new(client);
    let (tx, rx) = mpsc::unbounded_channel();
    let agent = AgenticLoop::discover(provider, backend)
        .await
        .context("failed to list tools")?
        .with_max_iterations(config.agent.max_iterations)
        .with_tool_timeout(config.agent.tool_timeout())
        .with_retry_delay(config.agent.retry_delay())
        .with_events(tx);
    terminal.print_tools(agent.tools())?;
    info!(
        tools = agent.tools().len(),
        model = %config.llm.openai_model,
        "ready"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            on_signal.cancel();
        }
    });

    let mut console = Console::new(&agent, rx, terminal);
    console
        .run(BufReader::new(tokio::io::stdin()), &cancel)
        .await
}
