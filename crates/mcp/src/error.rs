use troubleshooter_tool_runtime::ToolError;

use crate::types::{error_codes, JsonRpcError};

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidParams(String),

    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    /// Carries the classified tool error text unchanged.
    #[error("{0}")]
    ToolExecution(String),

    #[error("not initialized: call initialize first")]
    NotInitialized,

    #[error("server unavailable: {0}")]
    ServerUnavailable(String),

    /// An error response received from the remote side.
    #[error("{message}")]
    Rpc { code: i64, message: String },
}

impl McpError {
    pub fn code(&self) -> i64 {
        match self {
            McpError::JsonParse(_) => error_codes::PARSE_ERROR,
            McpError::NotInitialized => error_codes::INVALID_REQUEST,
            McpError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            McpError::InvalidParams(_) | McpError::ToolNotFound(_) => error_codes::INVALID_PARAMS,
            McpError::Rpc { code, .. } => *code,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data: None,
        }
    }
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        McpError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::UnknownTool(name) => McpError::ToolNotFound(name),
            ToolError::InvalidArguments(msg) => McpError::InvalidParams(msg),
            ToolError::Execution(e) => McpError::ToolExecution(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use troubleshooter_tool_runtime::ExecError;

    #[test]
    fn test_tool_errors_keep_their_text() {
        let invalid = ToolError::InvalidArguments(
            "missing or invalid 'arguments' string for kubectl".to_string(),
        );
        let text = invalid.to_string();
        let err = McpError::from(invalid);
        assert_eq!(err.code(), error_codes::INVALID_PARAMS);
        assert_eq!(err.to_string(), text);

        let unknown = McpError::from(ToolError::UnknownTool("helm".to_string()));
        assert_eq!(unknown.to_rpc_error().message, "unknown tool: helm");
        assert_eq!(unknown.code(), error_codes::INVALID_PARAMS);

        let exec = McpError::from(ToolError::Execution(ExecError::NonZeroExit {
            command: "kubectl".to_string(),
            code: 1,
            stderr: "boom".to_string(),
        }));
        assert_eq!(exec.code(), error_codes::INTERNAL_ERROR);
        assert_eq!(exec.to_string(), "kubectl exited with code 1: boom");
    }

    #[test]
    fn test_remote_error_passthrough() {
        let err = McpError::from(JsonRpcError {
            code: -32602,
            message: "unknown tool: helm".to_string(),
            data: None,
        });
        assert_eq!(err.code(), -32602);
        assert_eq!(err.to_string(), "unknown tool: helm");
    }
}
