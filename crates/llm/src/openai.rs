use async_trait::async_trait;
use tracing::{debug, warn};

use troubleshooter_tool_runtime::{ChatMessage, Completion, LlmError, ToolAwareLlmProvider, ToolDefinition};

use crate::translate;

/// OpenAI-compatible chat-completions client with function calling.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ToolAwareLlmProvider for OpenAiProvider {
    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = translate::build_request(&self.model, messages, tools);

        debug!(url = %url, messages = messages.len(), tools = tools.len(), "OpenAI request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::AuthError);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "OpenAI request failed");
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message: translate::error_message(&text),
            });
        }

        let resp: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let completion = translate::parse_completion(&resp)?;
        debug!(
            has_text = completion.content.is_some(),
            tool_calls = completion.tool_calls.len(),
            "OpenAI response"
        );
        Ok(completion)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}
