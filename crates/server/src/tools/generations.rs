//! cache_generations tool implementation.
//!
//! Inventory of cache generations plus the lifecycle status.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use waypost_engine::{Engine, LifecycleStatus};

use crate::tools::json_result;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GenerationSummary {
    pub name: String,
    /// "static" or "dynamic".
    pub purpose: String,
    pub entries: u64,
    pub created_at: String,
}

/// Output structure for the cache_generations tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGenerationsOutput {
    pub lifecycle: LifecycleStatus,
    pub generations: Vec<GenerationSummary>,
}

/// Implementation of the cache_generations tool.
pub async fn generations_impl(engine: &Engine) -> Result<CallToolResult, McpError> {
    let generations = engine
        .generations()
        .await?
        .into_iter()
        .map(|g| GenerationSummary {
            name: g.name,
            purpose: g.purpose.to_string(),
            entries: g.entry_count,
            created_at: g.created_at,
        })
        .collect();

    json_result(&CacheGenerationsOutput { lifecycle: engine.status().await, generations })
}
