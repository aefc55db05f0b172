//! Tool-surface errors.
//!
//! Engine failures convert through `waypost_core::Error`; these cover what
//! goes wrong before a call reaches the engine or after it returns.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Parameters that cannot form a request (bad base64, both body forms).
    #[error("INVALID_PARAMS: {0}")]
    InvalidParams(String),

    /// Tool output could not be encoded.
    #[error("ENCODE_FAILED: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let code = match &err {
            ToolError::InvalidParams(_) => -32602,
            ToolError::Encode(_) => -32603,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
