//! Workflow tools: definition CRUD, explicit triggering, and run audits.

use serde_json::{json, Value};

use huddle_core::storage;
use huddle_core::workflow::{EngineError, NewWorkflow, StepSpec};

use crate::requests::{CreateWorkflowRequest, StepRequest};
use crate::state::AppState;
use crate::tools::response::ToolResponse;

fn engine_error_response(e: &EngineError) -> ToolResponse {
    match e {
        EngineError::InvalidWorkflow(message) => ToolResponse::validation_error(message.clone()),
        EngineError::WorkflowNotFound(id) => ToolResponse::not_found(format!("workflow not found: {id}")),
        EngineError::Storage(e) => ToolResponse::db_error(e.to_string()),
    }
}

fn steps_from_request(steps: Vec<StepRequest>) -> Vec<StepSpec> {
    steps
        .into_iter()
        .map(|s| StepSpec {
            server: s.server,
            tool: s.tool,
            arguments: s.arguments.unwrap_or_default(),
        })
        .collect()
}

/// Persist a new workflow definition and return it.
pub async fn create_workflow(state: &AppState, req: CreateWorkflowRequest) -> String {
    let new = NewWorkflow {
        name: req.name,
        description: req.description,
        trigger_event: req.trigger_event,
        trigger_conditions: req.trigger_conditions.unwrap_or_default(),
        steps: steps_from_request(req.steps),
    };
    match state.engine.create_workflow(new).await {
        Ok(workflow) => ToolResponse::success(workflow).to_json(),
        Err(e) => engine_error_response(&e).to_json(),
    }
}

/// List stored definitions, optionally only active ones.
pub async fn list_workflows(state: &AppState, active_only: bool) -> String {
    match storage::workflows::list(&state.db, active_only).await {
        Ok(workflows) => ToolResponse::success(json!({
            "count": workflows.len(),
            "workflows": workflows,
        }))
        .to_json(),
        Err(e) => ToolResponse::db_error(e.to_string()).to_json(),
    }
}

/// Flip a definition's active flag.
pub async fn toggle_workflow(state: &AppState, id: i64, active: bool) -> String {
    match storage::workflows::set_active(&state.db, id, active).await {
        Ok(true) => ToolResponse::success(json!({ "id": id, "active": active })).to_json(),
        Ok(false) => ToolResponse::not_found(format!("workflow not found: {id}")).to_json(),
        Err(e) => ToolResponse::db_error(e.to_string()).to_json(),
    }
}

/// Explicitly run a workflow and return the completed run with its steps.
pub async fn trigger_workflow(state: &AppState, id: i64, payload: Option<Value>) -> String {
    let payload = payload.unwrap_or_else(|| json!({}));
    if !payload.is_object() {
        return ToolResponse::validation_error("payload must be a JSON object").to_json();
    }
    match state.engine.trigger(id, payload).await {
        Ok(run) => ToolResponse::success(run).to_json(),
        Err(e) => engine_error_response(&e).to_json(),
    }
}

/// Fetch one run joined with its step records.
pub async fn get_workflow_run(state: &AppState, run_id: i64) -> String {
    match storage::runs::get_run_with_steps(&state.db, run_id).await {
        Ok(Some(run)) => ToolResponse::success(run).to_json(),
        Ok(None) => ToolResponse::not_found(format!("run not found: {run_id}")).to_json(),
        Err(e) => ToolResponse::db_error(e.to_string()).to_json(),
    }
}

/// List recent runs, optionally restricted to one workflow.
pub async fn list_workflow_runs(state: &AppState, workflow_id: Option<i64>, limit: u32) -> String {
    match storage::runs::list_runs(&state.db, workflow_id, limit).await {
        Ok(runs) => ToolResponse::success(json!({
            "count": runs.len(),
            "runs": runs,
        }))
        .to_json(),
        Err(e) => ToolResponse::db_error(e.to_string()).to_json(),
    }
}
