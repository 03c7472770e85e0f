use clap::Parser;

/// Interactive Kubernetes troubleshooter.
///
/// Connects to the troubleshooter tool server over SSE and answers questions
/// about the cluster by letting the model drive `kubectl` and `k8sgpt`.
#[derive(Parser, Debug)]
#[command(name = "troubleshooter-cli", version, about = "Interactive Kubernetes troubleshooter")]
pub struct CliArgs {
    /// SSE endpoint of the tool server (overrides TROUBLESHOOTER_MCP_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Model name (overrides OPENAI_MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// API key (overrides OPENAI_API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Round limit per question (overrides TROUBLESHOOTER_MAX_ITERATIONS)
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}
