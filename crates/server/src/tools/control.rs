//! control tool implementation.
//!
//! Accepts the two lifecycle control messages.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use waypost_engine::{ControlMessage, Engine};

use crate::tools::json_result;

/// Input parameters for the control tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ControlParams {
    /// `{"type": "force-activate"}` or `{"type": "get-version"}`.
    pub message: ControlMessage,
}

/// Implementation of the control tool.
pub async fn control_impl(engine: &Engine, params: ControlParams) -> Result<CallToolResult, McpError> {
    let reply = engine.control(params.message).await?;
    json_result(&reply)
}
