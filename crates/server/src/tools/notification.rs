//! notification_click tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use waypost_engine::Engine;

use crate::tools::json_result;

/// Input parameters for the notification_click tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NotificationClickParams {
    /// Action id of the clicked button; omitted for a click on the body.
    #[serde(default)]
    pub action: Option<String>,
}

/// Output structure for the notification_click tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NotificationClickOutput {
    /// Where to open the application.
    pub open_url: String,
}

/// Implementation of the notification_click tool.
pub fn notification_click_impl(engine: &Engine, params: NotificationClickParams) -> Result<CallToolResult, McpError> {
    let open_url = engine.notification_click(params.action.as_deref());
    json_result(&NotificationClickOutput { open_url })
}
