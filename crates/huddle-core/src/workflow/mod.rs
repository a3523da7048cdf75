//! Workflow layer: stored event reactions executed as multi-step tool calls.
//!
//! A workflow names a trigger event, a flat map of trigger conditions, and
//! an ordered list of steps. The [`engine`] matches published events against
//! active workflows, resolves each step's argument templates against the
//! trigger payload and earlier step results, executes the steps through the
//! client pool, and records a durable audit of the run.

pub mod engine;
pub mod template;
pub mod trigger;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StorageError;

// ── EngineError ──────────────────────────────────────────────────────

/// Engine-internal failures. Any of these fails the run it occurred in.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Storage-layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The workflow id does not exist.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(i64),

    /// A definition failed validation (empty steps, bad trigger event).
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),
}

// ── Definitions ──────────────────────────────────────────────────────

/// One step of a workflow: a tool invocation on a peer server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Registered name of the target server.
    pub server: String,
    /// Tool to invoke on that server.
    pub tool: String,
    /// Argument map; string values may carry `{{...}}` templates.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// A stored workflow definition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger_event: String,
    pub trigger_conditions: Map<String, Value>,
    pub steps: Vec<StepSpec>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for creating a workflow definition.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub trigger_event: String,
    pub trigger_conditions: Map<String, Value>,
    pub steps: Vec<StepSpec>,
}

// ── Run audit ────────────────────────────────────────────────────────

/// Terminal and in-flight states of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Column representation.
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Parse the column representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// States of one step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    /// Column representation.
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    /// Parse the column representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StepStatus::Pending),
            "running" => Some(StepStatus::Running),
            "completed" => Some(StepStatus::Completed),
            "failed" => Some(StepStatus::Failed),
            _ => None,
        }
    }
}

/// One execution of a workflow against one triggering payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: i64,
    pub workflow_id: i64,
    pub status: RunStatus,
    pub trigger_payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// The audit of one tool invocation inside a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: i64,
    pub run_id: i64,
    pub step_index: i64,
    pub server: String,
    pub tool: String,
    pub arguments: Value,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// A run joined with its ordered step records.
#[derive(Debug, Clone, Serialize)]
pub struct RunWithSteps {
    #[serde(flatten)]
    pub run: WorkflowRun,
    pub steps: Vec<StepRecord>,
}
