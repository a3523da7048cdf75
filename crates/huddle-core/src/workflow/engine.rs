//! Event-triggered workflow execution.
//!
//! The engine subscribes to every event with a `**` pattern handler. On
//! each event it loads the active workflows whose trigger equals the event
//! name, filters them through condition matching, and runs each match as
//! its own concurrent run. Within a run, steps execute strictly in order;
//! the first failing step fails the run and later steps never start. Prior
//! step side effects are not rolled back; the fabric has no compensation
//! model.

use std::sync::Arc;

use futures::future::join_all;
use rmcp::model::{CallToolResult, RawContent};
use serde_json::{json, Value};

use super::template::{self, ResolutionContext};
use super::trigger::conditions_match;
use super::{EngineError, NewWorkflow, RunWithSteps, Workflow};
use crate::events::{registry::validate_name, EventBus, Subscription};
use crate::pool::ClientPool;
use crate::storage::{self, now_iso, DbPool};

/// The workflow engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    db: DbPool,
    pool: Arc<ClientPool>,
    bus: EventBus,
}

impl WorkflowEngine {
    /// Create an engine over the given store, client pool, and bus.
    pub fn new(db: DbPool, pool: Arc<ClientPool>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(EngineInner { db, pool, bus }),
        }
    }

    /// Subscribe the engine to every event on the bus.
    ///
    /// The returned subscription keeps the engine attached; unsubscribe it
    /// to detach. The engine's own lifecycle events flow through the same
    /// handler, so a workflow may chain on `workflow:completed`.
    pub fn attach(&self) -> Result<Subscription, crate::error::EventError> {
        let engine = self.clone();
        self.inner.bus.subscribe_pattern("**", move |event, payload| {
            let engine = engine.clone();
            Box::pin(async move {
                engine.handle_event(&event, &payload).await;
                Ok(())
            })
        })
    }

    /// Validate and persist a new workflow definition.
    pub async fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow, EngineError> {
        if new.name.trim().is_empty() {
            return Err(EngineError::InvalidWorkflow("name must not be empty".to_string()));
        }
        if new.steps.is_empty() {
            return Err(EngineError::InvalidWorkflow(
                "steps must contain at least one entry".to_string(),
            ));
        }
        if let Err(e) = validate_name(&new.trigger_event) {
            return Err(EngineError::InvalidWorkflow(e.to_string()));
        }
        for (index, step) in new.steps.iter().enumerate() {
            if step.server.trim().is_empty() || step.tool.trim().is_empty() {
                return Err(EngineError::InvalidWorkflow(format!(
                    "step {index} must name a server and a tool"
                )));
            }
        }
        Ok(storage::workflows::insert(&self.inner.db, &new).await?)
    }

    /// React to one published event: run every matching active workflow.
    ///
    /// Matches run concurrently, each as its own task; this handler awaits
    /// them all so that `publish` returns only after the triggered runs
    /// have reached a terminal state.
    pub async fn handle_event(&self, event: &str, payload: &Value) {
        let workflows = match storage::workflows::active_for_event(&self.inner.db, event).await {
            Ok(workflows) => workflows,
            Err(e) => {
                tracing::error!(event, error = %e, "failed to load workflows for event");
                return;
            }
        };

        let matching: Vec<Workflow> = workflows
            .into_iter()
            .filter(|w| conditions_match(&w.trigger_conditions, payload))
            .collect();
        if matching.is_empty() {
            return;
        }
        tracing::debug!(event, count = matching.len(), "event matched workflows");

        let handles: Vec<_> = matching
            .into_iter()
            .map(|workflow| {
                let engine = self.clone();
                let payload = payload.clone();
                tokio::spawn(async move {
                    if let Err(e) = engine.execute(&workflow, &payload).await {
                        tracing::error!(
                            workflow = workflow.id,
                            error = %e,
                            "workflow run could not be recorded"
                        );
                    }
                })
            })
            .collect();
        join_all(handles).await;
    }

    /// Explicitly run a workflow, bypassing condition matching and the
    /// active flag. Returns the completed run joined with its steps.
    pub async fn trigger(&self, id: i64, payload: Value) -> Result<RunWithSteps, EngineError> {
        let workflow = storage::workflows::get(&self.inner.db, id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(id))?;

        let run_id = self.execute(&workflow, &payload).await?;
        storage::runs::get_run_with_steps(&self.inner.db, run_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(run_id))
    }

    /// Execute one run to a terminal state, recording every outcome.
    ///
    /// A step failure fails the run and is recorded, not returned; the
    /// `Err` path here is reserved for storage failures that prevent the
    /// audit itself.
    async fn execute(&self, workflow: &Workflow, payload: &Value) -> Result<i64, EngineError> {
        let db = &self.inner.db;
        let started = std::time::Instant::now();
        let (run_id, _started_at) = storage::runs::insert_run(db, workflow.id, payload).await?;

        tracing::info!(workflow = workflow.id, run = run_id, "workflow triggered");
        self.publish_lifecycle(
            "workflow:triggered",
            json!({
                "workflowId": workflow.id,
                "workflowName": workflow.name,
                "runId": run_id,
            }),
        )
        .await;

        let mut step_contexts: Vec<Value> = Vec::with_capacity(workflow.steps.len());
        for (index, step) in workflow.steps.iter().enumerate() {
            let ctx = ResolutionContext {
                payload,
                steps: &step_contexts,
            };
            let resolved = Value::Object(template::resolve_arguments(&step.arguments, &ctx));
            let step_id = storage::runs::insert_step(
                db,
                run_id,
                index as i64,
                &step.server,
                &step.tool,
                &resolved,
            )
            .await?;

            let outcome = self
                .inner
                .pool
                .call_tool(&step.server, &step.tool, resolved)
                .await;

            let error = match outcome {
                Ok(envelope) if envelope.is_error != Some(true) => {
                    let result = parse_step_result(&envelope);
                    storage::runs::complete_step(db, step_id, &result).await?;
                    step_contexts.push(json!({ "result": result }));
                    continue;
                }
                Ok(envelope) => {
                    format!("tool returned an error envelope: {}", text_content(&envelope))
                }
                Err(e) => e.to_string(),
            };

            storage::runs::fail_step(db, step_id, &error).await?;
            let duration_ms = started.elapsed().as_millis() as i64;
            storage::runs::finish_run(db, run_id, Some(&error), &now_iso(), duration_ms).await?;
            tracing::warn!(
                workflow = workflow.id,
                run = run_id,
                step = index,
                error = %error,
                "workflow run failed"
            );
            self.publish_lifecycle(
                "workflow:failed",
                json!({ "runId": run_id, "error": error }),
            )
            .await;
            return Ok(run_id);
        }

        let duration_ms = started.elapsed().as_millis() as i64;
        storage::runs::finish_run(db, run_id, None, &now_iso(), duration_ms).await?;
        tracing::info!(workflow = workflow.id, run = run_id, duration_ms, "workflow completed");
        self.publish_lifecycle("workflow:completed", json!({ "runId": run_id })).await;
        Ok(run_id)
    }

    /// Publish a fabric lifecycle event. These are pre-registered; a
    /// failure here indicates a bus handler chain problem, which must not
    /// take the run's audit down with it.
    async fn publish_lifecycle(&self, event: &str, payload: Value) {
        if let Err(e) = self.inner.bus.publish(event, payload).await {
            tracing::error!(event, error = %e, "failed to publish lifecycle event");
        }
    }
}

/// The step result recorded from a success envelope: the first text
/// content parsed as JSON when possible, the raw string otherwise.
fn parse_step_result(envelope: &CallToolResult) -> Value {
    let text = text_content(envelope);
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// Concatenated text content of an envelope.
fn text_content(envelope: &CallToolResult) -> String {
    envelope
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventRegistry, EventSchema, FieldKind};
    use crate::storage::init_test_db;
    use crate::workflow::{RunStatus, StepSpec, StepStatus};
    use serde_json::Map;
    use std::sync::Mutex;
    use std::time::Duration;

    async fn test_engine() -> (WorkflowEngine, EventBus) {
        let registry = Arc::new(EventRegistry::new());
        registry
            .register(
                "sprint:completed",
                EventSchema::new().optional("sprintName", FieldKind::String),
            )
            .expect("register");
        let bus = EventBus::new(registry);
        let db = init_test_db().await.expect("init db");
        let pool = Arc::new(ClientPool::new(Duration::from_secs(2)));
        (WorkflowEngine::new(db, pool, bus.clone()), bus)
    }

    fn one_step_workflow(server: &str) -> NewWorkflow {
        NewWorkflow {
            name: "retro-on-sprint-end".to_string(),
            description: None,
            trigger_event: "sprint:completed".to_string(),
            trigger_conditions: Map::new(),
            steps: vec![StepSpec {
                server: server.to_string(),
                tool: "create-retro".to_string(),
                arguments: serde_json::from_value(json!({
                    "sprintId": "{{payload.sprintName}}",
                    "format": "mad-sad-glad",
                }))
                .expect("arguments"),
            }],
        }
    }

    #[tokio::test]
    async fn create_workflow_requires_steps() {
        let (engine, _bus) = test_engine().await;
        let mut new = one_step_workflow("retrospective-manager");
        new.steps.clear();
        let err = engine.create_workflow(new).await.expect_err("empty steps");
        assert!(matches!(err, EngineError::InvalidWorkflow(_)));
    }

    #[tokio::test]
    async fn create_workflow_requires_valid_trigger_name() {
        let (engine, _bus) = test_engine().await;
        let mut new = one_step_workflow("retrospective-manager");
        new.trigger_event = "not a name".to_string();
        let err = engine.create_workflow(new).await.expect_err("bad trigger");
        assert!(matches!(err, EngineError::InvalidWorkflow(_)));
    }

    #[tokio::test]
    async fn trigger_unknown_workflow_fails() {
        let (engine, _bus) = test_engine().await;
        let err = engine.trigger(404, json!({})).await.expect_err("missing");
        assert!(matches!(err, EngineError::WorkflowNotFound(404)));
    }

    #[tokio::test]
    async fn failing_target_fails_the_run_and_publishes_events() {
        let (engine, bus) = test_engine().await;
        // The server is never registered with the pool, so the single step
        // fails at connection time.
        let workflow = engine
            .create_workflow(one_step_workflow("unreachable-server"))
            .await
            .expect("create");

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = bus
            .subscribe_pattern("workflow:*", move |name, _| {
                let sink = Arc::clone(&sink);
                Box::pin(async move {
                    sink.lock().expect("lock").push(name);
                    Ok(())
                })
            })
            .expect("subscribe");

        let run = engine
            .trigger(workflow.id, json!({ "sprintName": "Sprint-7" }))
            .await
            .expect("trigger records the failed run");

        assert_eq!(run.run.status, RunStatus::Failed);
        assert!(run.run.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert!(run.run.completed_at.is_some());
        assert!(run.run.duration_ms.is_some());

        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].status, StepStatus::Failed);
        // Template resolution happened before the failure and is audited.
        assert_eq!(run.steps[0].arguments["sprintId"], json!("Sprint-7"));
        assert_eq!(run.steps[0].arguments["format"], json!("mad-sad-glad"));

        let events = events.lock().expect("lock");
        assert_eq!(events.as_slice(), &["workflow:triggered", "workflow:failed"]);
    }

    #[tokio::test]
    async fn event_with_non_matching_conditions_does_not_run() {
        let (engine, bus) = test_engine().await;
        let mut new = one_step_workflow("unreachable-server");
        new.trigger_conditions = serde_json::from_value(json!({ "team": "platform" })).expect("map");
        let workflow = engine.create_workflow(new).await.expect("create");
        let _attached = engine.attach().expect("attach");

        bus.publish("sprint:completed", json!({ "sprintName": "S7", "team": "mobile" }))
            .await
            .expect("publish");

        let runs = storage::runs::list_runs(&engine.inner.db, Some(workflow.id), 10)
            .await
            .expect("list");
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn matching_event_creates_a_run_through_the_bus() {
        let (engine, bus) = test_engine().await;
        let workflow = engine
            .create_workflow(one_step_workflow("unreachable-server"))
            .await
            .expect("create");
        let _attached = engine.attach().expect("attach");

        bus.publish("sprint:completed", json!({ "sprintName": "S7" }))
            .await
            .expect("publish");

        // publish awaits the engine handler, which awaits the run.
        let runs = storage::runs::list_runs(&engine.inner.db, Some(workflow.id), 10)
            .await
            .expect("list");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn inactive_workflow_does_not_fire_from_events() {
        let (engine, bus) = test_engine().await;
        let workflow = engine
            .create_workflow(one_step_workflow("unreachable-server"))
            .await
            .expect("create");
        storage::workflows::set_active(&engine.inner.db, workflow.id, false)
            .await
            .expect("toggle");
        let _attached = engine.attach().expect("attach");

        bus.publish("sprint:completed", json!({}))
            .await
            .expect("publish");

        let runs = storage::runs::list_runs(&engine.inner.db, Some(workflow.id), 10)
            .await
            .expect("list");
        assert!(runs.is_empty());

        // The explicit trigger still works as a manual override.
        let run = engine.trigger(workflow.id, json!({})).await.expect("trigger");
        assert_eq!(run.run.workflow_id, workflow.id);
    }
}
