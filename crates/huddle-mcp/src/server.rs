//! MCP server definition with tool routing.
//!
//! Implements `ServerHandler` for the orchestrator, registering the
//! workflow and aggregation tools and dispatching calls to the tool
//! modules.

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};

use crate::requests::*;
use crate::state::SharedState;
use crate::tools;

/// Huddle orchestrator MCP server.
#[derive(Clone)]
pub struct HuddleMcpServer {
    state: SharedState,
    tool_router: ToolRouter<Self>,
}

impl HuddleMcpServer {
    /// Create a new MCP server with the given shared state.
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl HuddleMcpServer {
    // --- Workflows ---

    /// Create an event-triggered workflow: a trigger event, optional payload conditions, and an ordered list of tool calls on peer servers.
    #[tool(name = "create-workflow")]
    async fn create_workflow(
        &self,
        Parameters(req): Parameters<CreateWorkflowRequest>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let result = tools::workflows::create_workflow(&self.state, req).await;
        Ok(CallToolResult::success(vec![Content::text(result)]))
    }

    /// List stored workflow definitions.
    #[tool(name = "list-workflows")]
    async fn list_workflows(
        &self,
        Parameters(req): Parameters<ListWorkflowsRequest>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let active_only = req.active_only.unwrap_or(false);
        let result = tools::workflows::list_workflows(&self.state, active_only).await;
        Ok(CallToolResult::success(vec![Content::text(result)]))
    }

    /// Activate or deactivate a workflow; inactive workflows do not fire on events.
    #[tool(name = "toggle-workflow")]
    async fn toggle_workflow(
        &self,
        Parameters(req): Parameters<ToggleWorkflowRequest>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let result = tools::workflows::toggle_workflow(&self.state, req.id, req.active).await;
        Ok(CallToolResult::success(vec![Content::text(result)]))
    }

    /// Run a workflow immediately with the given payload, bypassing trigger matching. Returns the completed run with its step records.
    #[tool(name = "trigger-workflow")]
    async fn trigger_workflow(
        &self,
        Parameters(req): Parameters<TriggerWorkflowRequest>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let result = tools::workflows::trigger_workflow(&self.state, req.id, req.payload).await;
        Ok(CallToolResult::success(vec![Content::text(result)]))
    }

    /// Get one workflow run with all of its step records.
    #[tool(name = "get-workflow-run")]
    async fn get_workflow_run(
        &self,
        Parameters(req): Parameters<GetWorkflowRunRequest>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let result = tools::workflows::get_workflow_run(&self.state, req.run_id).await;
        Ok(CallToolResult::success(vec![Content::text(result)]))
    }

    /// List recent workflow runs, optionally for a single workflow.
    #[tool(name = "list-workflow-runs")]
    async fn list_workflow_runs(
        &self,
        Parameters(req): Parameters<ListWorkflowRunsRequest>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let limit = req.limit.unwrap_or(20);
        let result =
            tools::workflows::list_workflow_runs(&self.state, req.workflow_id, limit).await;
        Ok(CallToolResult::success(vec![Content::text(result)]))
    }

    // --- Aggregation ---

    /// Get a cross-suite overview aggregated from every configured source server. Unreachable sources degrade to {"status": "unavailable"}.
    #[tool(name = "get-overview")]
    async fn get_overview(
        &self,
        Parameters(req): Parameters<OverviewRequest>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let force = req.force_refresh.unwrap_or(false);
        let result = tools::overview::get_overview(&self.state, force).await;
        Ok(CallToolResult::success(vec![Content::text(result)]))
    }

    /// Get a per-project summary aggregated from every configured source server.
    #[tool(name = "get-project-summary")]
    async fn get_project_summary(
        &self,
        Parameters(req): Parameters<ProjectSummaryRequest>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let force = req.force_refresh.unwrap_or(false);
        let result = tools::overview::get_project_summary(&self.state, &req.project, force).await;
        Ok(CallToolResult::success(vec![Content::text(result)]))
    }

    /// Probe every registered peer server: connectivity, transport, and tool count.
    #[tool(name = "get-server-status")]
    async fn get_server_status(
        &self,
        Parameters(req): Parameters<ServerStatusRequest>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let force = req.force_refresh.unwrap_or(false);
        let result = tools::overview::get_server_status(&self.state, force).await;
        Ok(CallToolResult::success(vec![Content::text(result)]))
    }

    // --- Health ---

    /// Check orchestrator health: database connectivity and registered event names.
    #[tool(name = "health-check")]
    async fn health_check(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let db_ok = huddle_core::storage::ping(&self.state.db).await.is_ok();
        let response = tools::response::ToolResponse::success(serde_json::json!({
            "database": if db_ok { "ok" } else { "unreachable" },
            "registeredEvents": self.state.bus.registry().names(),
            "registeredServers": self.state.clients.registered_servers().len(),
        }));
        Ok(CallToolResult::success(vec![Content::text(response.to_json())]))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for HuddleMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Huddle orchestrator — collaboration fabric for the MCP server suite. \
                 Provides tools for event-triggered workflows (create, list, toggle, \
                 trigger, run audits) and cross-suite aggregation (overview, project \
                 summary, server status)."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
