//! queue_list tool implementation.
//!
//! Lists deferred writes still waiting for a sync trigger.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use waypost_core::QueuedWrite;
use waypost_engine::Engine;

use crate::tools::json_result;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PendingWrite {
    pub id: i64,
    pub tag: String,
    pub method: String,
    pub url: String,
    pub body_bytes: usize,
    pub enqueued_at: String,
}

impl From<QueuedWrite> for PendingWrite {
    fn from(write: QueuedWrite) -> Self {
        Self {
            id: write.id,
            tag: write.tag,
            method: write.method,
            url: write.url,
            body_bytes: write.body.map_or(0, |b| b.len()),
            enqueued_at: write.enqueued_at,
        }
    }
}

/// Output structure for the queue_list tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueListOutput {
    pub pending: Vec<PendingWrite>,
}

/// Implementation of the queue_list tool.
pub async fn queue_list_impl(engine: &Engine) -> Result<CallToolResult, McpError> {
    let pending = engine.pending_writes().await?.into_iter().map(PendingWrite::from).collect();
    json_result(&QueueListOutput { pending })
}
