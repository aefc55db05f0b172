//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the engine operations.
use std::sync::Arc;

use crate::tools::{
    ControlParams, InterceptParams, NotificationClickParams, SyncParams, control::control_impl,
    generations::generations_impl, intercept::intercept_impl, notification::notification_click_impl,
    queue::queue_list_impl, sync::sync_impl,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use waypost_engine::Engine;

/// The main MCP server handler for waypost.
#[derive(Clone)]
pub struct WaypostServer {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl WaypostServer {
    /// Create a new server handler around a built engine.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine, tool_router: Self::tool_router() }
    }

    /// Serve one intercepted request.
    ///
    /// The engine classifies the request, applies the matching caching strategy and returns exactly one
    /// response (or one error when nothing can answer it).
    #[tool(
        description = "Handle an outgoing request through the offline cache. Returns status, headers, body, resource class and response source."
    )]
    async fn intercept(&self, params: Parameters<InterceptParams>) -> Result<CallToolResult, McpError> {
        intercept_impl(&self.engine, params.0).await
    }

    /// Lifecycle control messages.
    #[tool(description = "Send a control message: {\"type\":\"force-activate\"} or {\"type\":\"get-version\"}.")]
    async fn control(&self, params: Parameters<ControlParams>) -> Result<CallToolResult, McpError> {
        control_impl(&self.engine, params.0).await
    }

    /// Background sync trigger.
    #[tool(description = "Replay queued offline writes for a sync tag (default: the configured sync tag).")]
    async fn sync(&self, params: Parameters<SyncParams>) -> Result<CallToolResult, McpError> {
        sync_impl(&self.engine, params.0).await
    }

    /// Resolve a notification click to the URL to open.
    #[tool(description = "Resolve a notification click. Action \"view\" opens the results view; anything else the default view.")]
    async fn notification_click(
        &self, params: Parameters<NotificationClickParams>,
    ) -> Result<CallToolResult, McpError> {
        notification_click_impl(&self.engine, params.0)
    }

    #[tool(description = "List queued writes waiting for the next sync trigger.")]
    async fn queue_list(&self) -> Result<CallToolResult, McpError> {
        queue_list_impl(&self.engine).await
    }

    #[tool(description = "List cache generations with entry counts, plus the engine lifecycle state.")]
    async fn cache_generations(&self) -> Result<CallToolResult, McpError> {
        generations_impl(&self.engine).await
    }
}

impl ServerHandler for WaypostServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "waypost".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(format!("Offline request cache, engine version {}.", self.engine.version())),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
