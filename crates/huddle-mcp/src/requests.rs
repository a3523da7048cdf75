//! Request structs for MCP tool parameters.
//!
//! Kept separate from `server.rs` so the tool router stays focused on
//! routing and the request shapes can be shared by tests.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

// --- Workflows ---

/// One step of a workflow definition.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StepRequest {
    /// Registered name of the target server.
    pub server: String,
    /// Tool to invoke on that server.
    pub tool: String,
    /// Argument map; string values may carry {{payload.*}} / {{steps[n].*}} templates.
    pub arguments: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateWorkflowRequest {
    /// Human-readable workflow name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Event name that triggers the workflow (e.g. 'scrum:sprint-completed').
    pub trigger_event: String,
    /// Flat map of payload keys that must equal these values for the trigger to fire.
    pub trigger_conditions: Option<Map<String, Value>>,
    /// Ordered steps; at least one is required.
    pub steps: Vec<StepRequest>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListWorkflowsRequest {
    /// Only return active workflows (default: false)
    pub active_only: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ToggleWorkflowRequest {
    /// The workflow ID.
    pub id: i64,
    /// New active state; inactive workflows do not fire on events.
    pub active: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TriggerWorkflowRequest {
    /// The workflow ID.
    pub id: i64,
    /// Payload to run against, as if it were a trigger event's payload.
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetWorkflowRunRequest {
    /// The run ID.
    pub run_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListWorkflowRunsRequest {
    /// Restrict to one workflow's runs.
    pub workflow_id: Option<i64>,
    /// Maximum number of runs to return (default: 20)
    pub limit: Option<u32>,
}

// --- Aggregation ---

#[derive(Debug, Deserialize, JsonSchema)]
pub struct OverviewRequest {
    /// Skip the cache and re-query every source (default: false)
    pub force_refresh: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProjectSummaryRequest {
    /// Project identifier the sources are asked about.
    pub project: String,
    /// Skip the cache and re-query every source (default: false)
    pub force_refresh: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ServerStatusRequest {
    /// Skip the cache and re-probe every server (default: false)
    pub force_refresh: Option<bool>,
}
