pub mod openai;
mod translate;

use std::sync::Arc;

use troubleshooter_core::config::LlmConfig;
use troubleshooter_tool_runtime::{LlmError, ToolAwareLlmProvider};

pub use openai::OpenAiProvider;

/// Create the chat-completions provider from config.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn ToolAwareLlmProvider>, LlmError> {
    let api_key = config
        .openai_api_key
        .as_ref()
        .ok_or_else(|| LlmError::NotConfigured("OPENAI_API_KEY not set".into()))?;
    Ok(Arc::new(OpenAiProvider::new(
        api_key.clone(),
        config.openai_model.clone(),
        config.openai_base_url.clone(),
    )))
}
