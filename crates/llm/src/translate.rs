//! Translation between the agent's conversation types and the OpenAI
//! chat-completions wire format.

use serde_json::{json, Value};

use troubleshooter_tool_runtime::{ChatMessage, Completion, LlmError, Role, ToolCall, ToolDefinition};

/// Translate a [`ToolDefinition`] into an OpenAI function tool.
pub(crate) fn tool_definition_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

pub(crate) fn message_to_openai(msg: &ChatMessage) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    json!({ "role": role, "content": msg.content })
}

/// Build the request body. Sampling is pinned with `seed: 0`; the `tools`
/// key is omitted when there is nothing to offer.
pub(crate) fn build_request(model: &str, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages.iter().map(message_to_openai).collect::<Vec<_>>(),
        "seed": 0,
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.iter().map(tool_definition_to_openai).collect());
    }
    body
}

/// Extract the first choice's text and function-call intents.
pub(crate) fn parse_completion(resp: &Value) -> Result<Completion, LlmError> {
    let message = resp
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message".into()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(String::from);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for (index, call) in calls.iter().enumerate() {
            let function = call
                .get("function")
                .ok_or_else(|| LlmError::InvalidResponse(format!("tool_calls[{index}] has no function")))?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| LlmError::InvalidResponse(format!("tool_calls[{index}] has no name")))?;
            tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| format!("call_{index}")),
                name: name.to_string(),
                // Kept verbatim; the agent loop decides whether it parses.
                arguments: function
                    .get("arguments")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    Ok(Completion { content, tool_calls })
}

/// Pull a readable message out of an OpenAI error body.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}
