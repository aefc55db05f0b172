//! sync tool implementation.
//!
//! The background trigger channel: replays queued writes for a tag.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use waypost_engine::Engine;

use crate::tools::json_result;

/// Input parameters for the sync tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncParams {
    /// Trigger name (default: the engine's configured sync tag).
    #[serde(default)]
    pub tag: Option<String>,
}

/// Implementation of the sync tool.
pub async fn sync_impl(engine: &Engine, params: SyncParams) -> Result<CallToolResult, McpError> {
    let tag = params.tag.as_deref().unwrap_or_else(|| engine.sync_tag());
    let report = engine.sync(tag).await?;
    json_result(&report)
}
