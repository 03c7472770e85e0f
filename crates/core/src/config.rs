use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Profile-aware view over a key/value source.
///
/// When a profile is set (e.g. `PROD`), every key is first looked up as
/// `{PROFILE}_{KEY}`, falling back to `{KEY}`. Empty values count as unset.
struct EnvSource<'a> {
    profile: String,
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvSource<'_> {
    fn opt(&self, key: &str) -> Option<String> {
        let get = |k: &str| (self.lookup)(k).filter(|s| !s.is_empty());
        if !self.profile.is_empty() {
            if let Some(v) = get(&format!("{}_{}", self.profile, key)) {
                return Some(v);
            }
        }
        get(key)
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn u64(&self, key: &str, default: u64) -> u64 {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    /// Fallback tracing filter when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TROUBLESHOOTER_PROFILE`.
    pub fn from_env() -> Self {
        let lookup = |k: &str| env::var(k).ok();
        Self::from_lookup(&lookup)
    }

    /// Build config from an arbitrary key lookup. `from_env` is this over
    /// the process environment.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let profile = lookup("TROUBLESHOOTER_PROFILE")
            .unwrap_or_default()
            .to_uppercase();
        let src = EnvSource {
            profile: profile.clone(),
            lookup,
        };
        Self {
            profile,
            server: ServerConfig::from_source(&src),
            client: ClientConfig::from_source(&src),
            llm: LlmConfig::from_source(&src),
            agent: AgentConfig::from_source(&src),
            log_filter: src.or("TROUBLESHOOTER_LOG", "info"),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:  bind={}, base_url={}", self.server.bind, self.server.base_url);
        tracing::info!("  client:  mcp_endpoint={}", self.client.mcp_endpoint);
        tracing::info!(
            "  llm:     model={}, base_url={}, configured={}",
            self.llm.openai_model,
            self.llm.openai_base_url,
            self.llm.is_configured()
        );
        tracing::info!(
            "  agent:   max_iterations={}, tool_timeout={}s, retry_delay={}s",
            self.agent.max_iterations,
            self.agent.tool_timeout_secs,
            self.agent.retry_delay_secs
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the SSE server listens on.
    pub bind: String,
    /// Public base URL advertised to SSE clients in the `endpoint` event.
    pub base_url: String,
}

impl ServerConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            bind: src.or("TROUBLESHOOTER_BIND", "127.0.0.1:8090"),
            base_url: src.or("TROUBLESHOOTER_BASE_URL", "http://localhost:8090"),
        }
    }
}

// ── Console client ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub mcp_endpoint: String,
}

impl ClientConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            mcp_endpoint: src.or("TROUBLESHOOTER_MCP_ENDPOINT", "http://localhost:8090/sse"),
        }
    }
}

// ── LLM ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
}

impl LlmConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            openai_api_key: src.opt("OPENAI_API_KEY"),
            openai_base_url: src.or("OPENAI_BASE_URL", "https://api.openai.com"),
            openai_model: src.or("OPENAI_MODEL", "gpt-4o-mini"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.openai_api_key.is_some()
    }
}

// ── Agent loop ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub tool_timeout_secs: u64,
    pub retry_delay_secs: u64,
}

impl AgentConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            max_iterations: src.usize("TROUBLESHOOTER_MAX_ITERATIONS", 5),
            tool_timeout_secs: src.u64("TROUBLESHOOTER_TOOL_TIMEOUT_SECS", 30),
            retry_delay_secs: src.u64("TROUBLESHOOTER_RETRY_DELAY_SECS", 2),
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let lookup = move |k: &str| map.get(k).cloned();
        Config::from_lookup(&lookup)
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.profile_label(), "default");
        assert_eq!(config.server.bind, "127.0.0.1:8090");
        assert_eq!(config.client.mcp_endpoint, "http://localhost:8090/sse");
        assert_eq!(config.llm.openai_model, "gpt-4o-mini");
        assert!(!config.llm.is_configured());
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.agent.tool_timeout(), Duration::from_secs(30));
        assert_eq!(config.agent.retry_delay(), Duration::from_secs(2));
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("TROUBLESHOOTER_MAX_ITERATIONS", "8"),
            ("TROUBLESHOOTER_TOOL_TIMEOUT_SECS", "10"),
        ]);
        assert!(config.llm.is_configured());
        assert_eq!(config.agent.max_iterations, 8);
        assert_eq!(config.agent.tool_timeout_secs, 10);
    }

    #[test]
    fn test_profile_prefix_wins() {
        let config = config_from(&[
            ("TROUBLESHOOTER_PROFILE", "prod"),
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("PROD_OPENAI_MODEL", "gpt-4o"),
        ]);
        assert_eq!(config.profile_label(), "PROD");
        assert_eq!(config.llm.openai_model, "gpt-4o");
    }

    #[test]
    fn test_empty_and_unparseable_values_fall_back() {
        let config = config_from(&[
            ("OPENAI_API_KEY", ""),
            ("TROUBLESHOOTER_MAX_ITERATIONS", "lots"),
        ]);
        assert!(config.llm.openai_api_key.is_none());
        assert_eq!(config.agent.max_iterations, 5);
    }
}
