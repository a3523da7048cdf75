//! End-to-end fabric tests over linked in-memory transports.
//!
//! A small retrospective server is served over one end of a duplex pair;
//! the client pool attaches the other end. This exercises the real MCP
//! handshake, tool dispatch, and envelope handling without processes or
//! sockets.

use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParams, ProtocolVersion, RawContent, ServerCapabilities, ServerInfo,
    Tool as McpTool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData, ServerHandler, ServiceExt};
use serde_json::{json, Value};

use huddle_core::events::{EventBus, EventRegistry, EventSchema, FieldKind};
use huddle_core::pool::ClientPool;
use huddle_core::storage;
use huddle_core::workflow::engine::WorkflowEngine;
use huddle_core::workflow::{NewWorkflow, RunStatus, StepSpec, StepStatus};

/// Test peer: greeting plus a minimal retrospective board.
#[derive(Clone)]
struct RetroServer;

fn tool(name: &str, description: &str) -> McpTool {
    let schema = json!({ "type": "object" });
    let schema_obj = schema.as_object().expect("object").clone();
    McpTool {
        name: Cow::Owned(name.to_string()),
        title: None,
        description: Some(Cow::Owned(description.to_string())),
        input_schema: Arc::new(schema_obj),
        output_schema: None,
        annotations: None,
        execution: None,
        icons: None,
        meta: None,
    }
}

impl ServerHandler for RetroServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "retrospective-manager".to_string(),
                version: "0.0.1".to_string(),
                ..Default::default()
            },
            instructions: None,
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(vec![
            tool("greet", "Greet a caller by name"),
            tool("create-retro", "Create a retrospective for a sprint"),
            tool("add-item", "Add an item to a retrospective"),
            tool("always-fail", "Return an error envelope"),
        ]))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let args = request
            .arguments
            .map(Value::Object)
            .unwrap_or_else(|| json!({}));
        match &*request.name {
            "greet" => {
                let name = args["name"].as_str().unwrap_or("stranger");
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "Hello, {name}!"
                ))]))
            }
            "create-retro" => {
                let body = json!({
                    "id": "retro-1",
                    "sprintId": args["sprintId"],
                    "format": args["format"],
                });
                Ok(CallToolResult::success(vec![Content::text(body.to_string())]))
            }
            "add-item" => {
                let body = json!({
                    "ok": true,
                    "retroId": args["retroId"],
                    "text": args["text"],
                });
                Ok(CallToolResult::success(vec![Content::text(body.to_string())]))
            }
            "always-fail" => Ok(CallToolResult::error(vec![Content::text(
                "the board rejected the request",
            )])),
            other => Err(ErrorData::invalid_params(format!("tool not found: {other}"), None)),
        }
    }
}

/// Serve the test peer over a linked pair and attach the client end.
async fn attach_retro_server(
    pool: &ClientPool,
    name: &str,
) -> rmcp::service::RunningService<RoleServer, RetroServer> {
    let (client_end, server_end) = ClientPool::create_in_memory_pair();
    let server = RetroServer
        .serve(server_end)
        .await
        .expect("serve test peer");
    pool.connect_in_memory_with_transport(name, client_end)
        .await
        .expect("attach client end");
    server
}

fn first_text(envelope: &CallToolResult) -> String {
    envelope
        .content
        .iter()
        .find_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.clone()),
            _ => None,
        })
        .expect("text content")
}

#[tokio::test]
async fn in_memory_pair_connects_and_invokes_a_tool() {
    let pool = ClientPool::new(Duration::from_secs(5));
    let _server = attach_retro_server(&pool, "greeter").await;

    let envelope = pool
        .call_tool("greeter", "greet", json!({ "name": "World" }))
        .await
        .expect("call greet");

    assert_ne!(envelope.is_error, Some(true));
    assert_eq!(first_text(&envelope), "Hello, World!");
}

#[tokio::test]
async fn connection_state_follows_attach_and_disconnect() {
    let pool = ClientPool::new(Duration::from_secs(5));
    let _server = attach_retro_server(&pool, "greeter").await;
    assert!(pool.is_connected("greeter").await);

    pool.disconnect("greeter").await;
    assert!(!pool.is_connected("greeter").await);

    // Double-disconnect is a no-op.
    pool.disconnect("greeter").await;
    assert!(!pool.is_connected("greeter").await);
}

#[tokio::test]
async fn disconnect_all_clears_every_connection() {
    let pool = ClientPool::new(Duration::from_secs(5));
    let _a = attach_retro_server(&pool, "board-a").await;
    let _b = attach_retro_server(&pool, "board-b").await;
    assert!(pool.is_connected("board-a").await);
    assert!(pool.is_connected("board-b").await);

    pool.disconnect_all().await;
    assert!(!pool.is_connected("board-a").await);
    assert!(!pool.is_connected("board-b").await);
}

#[tokio::test]
async fn concurrent_calls_multiplex_over_one_connection() {
    let pool = Arc::new(ClientPool::new(Duration::from_secs(5)));
    let _server = attach_retro_server(&pool, "greeter").await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let envelope = pool
                    .call_tool("greeter", "greet", json!({ "name": format!("caller-{i}") }))
                    .await
                    .expect("call greet");
                first_text(&envelope)
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.expect("join"), format!("Hello, caller-{i}!"));
    }
}

async fn fabric(db_path: &str) -> (EventBus, Arc<ClientPool>, WorkflowEngine, storage::DbPool) {
    let registry = Arc::new(EventRegistry::new());
    registry
        .register(
            "sprint:completed",
            EventSchema::new().required("sprintName", FieldKind::String),
        )
        .expect("register event");
    let bus = EventBus::new(registry);
    let db = storage::init_db(db_path).await.expect("init db");
    let pool = Arc::new(ClientPool::new(Duration::from_secs(5)));
    let engine = WorkflowEngine::new(db.clone(), Arc::clone(&pool), bus.clone());
    (bus, pool, engine, db)
}

fn step(server: &str, tool: &str, arguments: Value) -> StepSpec {
    StepSpec {
        server: server.to_string(),
        tool: tool.to_string(),
        arguments: arguments.as_object().expect("object").clone(),
    }
}

#[tokio::test]
async fn workflow_runs_end_to_end_with_template_chaining() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("huddle.db").to_string_lossy().to_string();
    let (bus, pool, engine, db) = fabric(&db_path).await;
    let _server = attach_retro_server(&pool, "retrospective-manager").await;
    let _attached = engine.attach().expect("attach engine");

    let workflow = engine
        .create_workflow(NewWorkflow {
            name: "retro-on-sprint-end".to_string(),
            description: None,
            trigger_event: "sprint:completed".to_string(),
            trigger_conditions: serde_json::Map::new(),
            steps: vec![
                step(
                    "retrospective-manager",
                    "create-retro",
                    json!({ "sprintId": "{{payload.sprintName}}", "format": "mad-sad-glad" }),
                ),
                step(
                    "retrospective-manager",
                    "add-item",
                    json!({
                        "retroId": "{{steps[0].result.id}}",
                        "text": "Sprint {{payload.sprintName}} wrapped",
                    }),
                ),
            ],
        })
        .await
        .expect("create workflow");

    let lifecycle = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lifecycle);
    let _sub = bus
        .subscribe_pattern("workflow:*", move |name, _| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().expect("lock").push(name);
                Ok(())
            })
        })
        .expect("subscribe lifecycle");

    bus.publish("sprint:completed", json!({ "sprintName": "Sprint-7" }))
        .await
        .expect("publish");

    let runs = storage::runs::list_runs(&db, Some(workflow.id), 10)
        .await
        .expect("list runs");
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.error.is_none());
    assert!(run.completed_at.is_some());
    assert!(run.duration_ms.is_some());

    let joined = storage::runs::get_run_with_steps(&db, run.id)
        .await
        .expect("join")
        .expect("exists");
    assert_eq!(joined.steps.len(), 2);
    for (index, record) in joined.steps.iter().enumerate() {
        assert_eq!(record.step_index, index as i64);
        assert_eq!(record.status, StepStatus::Completed);
    }

    // Step 0 resolved the payload template with its string type intact.
    assert_eq!(joined.steps[0].arguments["sprintId"], json!("Sprint-7"));
    assert_eq!(joined.steps[0].arguments["format"], json!("mad-sad-glad"));
    // Step 1 resolved against step 0's parsed result and the payload.
    assert_eq!(joined.steps[1].arguments["retroId"], json!("retro-1"));
    assert_eq!(joined.steps[1].arguments["text"], json!("Sprint Sprint-7 wrapped"));
    // Step results were parsed from the envelope's JSON text.
    assert_eq!(joined.steps[0].result.as_ref().expect("result")["id"], json!("retro-1"));

    let lifecycle = lifecycle.lock().expect("lock");
    assert_eq!(
        lifecycle.as_slice(),
        &["workflow:triggered", "workflow:completed"]
    );
}

#[tokio::test]
async fn step_error_envelope_fails_the_run_and_stops() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("huddle.db").to_string_lossy().to_string();
    let (bus, pool, engine, _db) = fabric(&db_path).await;
    let _server = attach_retro_server(&pool, "retrospective-manager").await;

    let workflow = engine
        .create_workflow(NewWorkflow {
            name: "doomed".to_string(),
            description: None,
            trigger_event: "sprint:completed".to_string(),
            trigger_conditions: serde_json::Map::new(),
            steps: vec![
                step("retrospective-manager", "create-retro", json!({ "sprintId": "S1" })),
                step("retrospective-manager", "always-fail", json!({})),
                step("retrospective-manager", "add-item", json!({ "text": "never runs" })),
            ],
        })
        .await
        .expect("create workflow");

    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    let _sub = bus
        .subscribe("workflow:failed", move |payload| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().expect("lock").push(payload);
                Ok(())
            })
        })
        .expect("subscribe");

    let run = engine
        .trigger(workflow.id, json!({ "sprintName": "S1" }))
        .await
        .expect("trigger");

    assert_eq!(run.run.status, RunStatus::Failed);
    let error = run.run.error.as_deref().expect("error");
    assert!(error.contains("the board rejected the request"));

    // Exactly one failed step, every preceding step completed, none after.
    assert_eq!(run.steps.len(), 2);
    assert_eq!(run.steps[0].status, StepStatus::Completed);
    assert_eq!(run.steps[1].status, StepStatus::Failed);

    let failures = failures.lock().expect("lock");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["runId"], json!(run.run.id));
}
