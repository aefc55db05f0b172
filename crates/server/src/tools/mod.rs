//! MCP tool implementations.
//!
//! Each tool is a thin adapter from JSON parameters to one engine
//! operation; results are returned as pretty-printed JSON text content.

pub mod control;
pub mod generations;
pub mod intercept;
pub mod notification;
pub mod queue;
pub mod sync;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use crate::error::ToolError;

pub use control::ControlParams;
pub use intercept::InterceptParams;
pub use notification::NotificationClickParams;
pub use sync::SyncParams;

/// Wrap a serializable output as a successful tool result.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(output).map_err(ToolError::from)?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}
