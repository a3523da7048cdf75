//! CRUD operations for the `workflow_runs` and `workflow_steps` tables.
//!
//! Runs are append-only except for their terminal status and duration;
//! steps transition running → completed/failed exactly once. Persistence
//! order of steps equals execution order, so `step_index` is dense.

use serde_json::Value;

use super::{now_iso, DbPool};
use crate::error::StorageError;
use crate::workflow::{RunStatus, RunWithSteps, StepRecord, StepStatus, WorkflowRun};

type RunRow = (
    i64,
    i64,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<i64>,
);

type StepRow = (
    i64,
    i64,
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn parse_json(column: &'static str, text: &str) -> Result<Value, StorageError> {
    serde_json::from_str(text).map_err(|e| StorageError::CorruptJson {
        column: column.to_string(),
        message: e.to_string(),
    })
}

fn row_to_run(row: RunRow) -> Result<WorkflowRun, StorageError> {
    let (id, workflow_id, status, payload, error, started_at, completed_at, duration_ms) = row;
    let status = RunStatus::parse(&status).ok_or_else(|| StorageError::CorruptJson {
        column: "workflow_runs.status".to_string(),
        message: format!("unknown status '{status}'"),
    })?;
    Ok(WorkflowRun {
        id,
        workflow_id,
        status,
        trigger_payload: parse_json("workflow_runs.trigger_payload", &payload)?,
        error,
        started_at,
        completed_at,
        duration_ms,
    })
}

fn row_to_step(row: StepRow) -> Result<StepRecord, StorageError> {
    let (id, run_id, step_index, server, tool, arguments, status, result, error, started_at, completed_at) =
        row;
    let status = StepStatus::parse(&status).ok_or_else(|| StorageError::CorruptJson {
        column: "workflow_steps.status".to_string(),
        message: format!("unknown status '{status}'"),
    })?;
    Ok(StepRecord {
        id,
        run_id,
        step_index,
        server,
        tool,
        arguments: parse_json("workflow_steps.arguments", &arguments)?,
        status,
        result: result
            .map(|text| parse_json("workflow_steps.result", &text))
            .transpose()?,
        error,
        started_at,
        completed_at,
    })
}

// ── Runs ─────────────────────────────────────────────────────────────

/// Create a run in `running` state. Returns the run id and start time.
pub async fn insert_run(
    pool: &DbPool,
    workflow_id: i64,
    trigger_payload: &Value,
) -> Result<(i64, String), StorageError> {
    let started_at = now_iso();
    let payload = trigger_payload.to_string();
    let result = sqlx::query(
        "INSERT INTO workflow_runs (workflow_id, status, trigger_payload, started_at) \
         VALUES (?1, 'running', ?2, ?3)",
    )
    .bind(workflow_id)
    .bind(&payload)
    .bind(&started_at)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok((result.last_insert_rowid(), started_at))
}

/// Mark a run terminal. `error` distinguishes `failed` from `completed`.
pub async fn finish_run(
    pool: &DbPool,
    run_id: i64,
    error: Option<&str>,
    completed_at: &str,
    duration_ms: i64,
) -> Result<(), StorageError> {
    let status = if error.is_some() {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    };
    sqlx::query(
        "UPDATE workflow_runs SET status = ?1, error = ?2, completed_at = ?3, duration_ms = ?4 \
         WHERE id = ?5",
    )
    .bind(status.as_str())
    .bind(error)
    .bind(completed_at)
    .bind(duration_ms)
    .bind(run_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch one run. Returns `None` if it does not exist.
pub async fn get_run(pool: &DbPool, run_id: i64) -> Result<Option<WorkflowRun>, StorageError> {
    let row: Option<RunRow> = sqlx::query_as(
        "SELECT id, workflow_id, status, trigger_payload, error, started_at, completed_at, \
         duration_ms FROM workflow_runs WHERE id = ?1",
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    row.map(row_to_run).transpose()
}

/// List runs newest-first, optionally for one workflow.
pub async fn list_runs(
    pool: &DbPool,
    workflow_id: Option<i64>,
    limit: u32,
) -> Result<Vec<WorkflowRun>, StorageError> {
    let rows: Vec<RunRow> = match workflow_id {
        Some(id) => {
            sqlx::query_as(
                "SELECT id, workflow_id, status, trigger_payload, error, started_at, \
                 completed_at, duration_ms FROM workflow_runs WHERE workflow_id = ?1 \
                 ORDER BY id DESC LIMIT ?2",
            )
            .bind(id)
            .bind(i64::from(limit))
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as(
                "SELECT id, workflow_id, status, trigger_payload, error, started_at, \
                 completed_at, duration_ms FROM workflow_runs ORDER BY id DESC LIMIT ?1",
            )
            .bind(i64::from(limit))
            .fetch_all(pool)
            .await
        }
    }
    .map_err(|e| StorageError::Query { source: e })?;
    rows.into_iter().map(row_to_run).collect()
}

/// Fetch a run joined with its step records in execution order.
pub async fn get_run_with_steps(
    pool: &DbPool,
    run_id: i64,
) -> Result<Option<RunWithSteps>, StorageError> {
    let Some(run) = get_run(pool, run_id).await? else {
        return Ok(None);
    };
    let steps = steps_for_run(pool, run_id).await?;
    Ok(Some(RunWithSteps { run, steps }))
}

// ── Steps ────────────────────────────────────────────────────────────

/// Create a step record in `running` state with its resolved arguments.
pub async fn insert_step(
    pool: &DbPool,
    run_id: i64,
    step_index: i64,
    server: &str,
    tool: &str,
    arguments: &Value,
) -> Result<i64, StorageError> {
    let result = sqlx::query(
        "INSERT INTO workflow_steps (run_id, step_index, server, tool, arguments, status, started_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 'running', ?6)",
    )
    .bind(run_id)
    .bind(step_index)
    .bind(server)
    .bind(tool)
    .bind(arguments.to_string())
    .bind(now_iso())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.last_insert_rowid())
}

/// Mark a step completed with its parsed result.
pub async fn complete_step(pool: &DbPool, step_id: i64, result: &Value) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE workflow_steps SET status = 'completed', result = ?1, completed_at = ?2 \
         WHERE id = ?3",
    )
    .bind(result.to_string())
    .bind(now_iso())
    .bind(step_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Mark a step failed with an error description.
pub async fn fail_step(pool: &DbPool, step_id: i64, error: &str) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE workflow_steps SET status = 'failed', error = ?1, completed_at = ?2 WHERE id = ?3",
    )
    .bind(error)
    .bind(now_iso())
    .bind(step_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Step records for a run, ordered by `step_index`.
pub async fn steps_for_run(pool: &DbPool, run_id: i64) -> Result<Vec<StepRecord>, StorageError> {
    let rows: Vec<StepRow> = sqlx::query_as(
        "SELECT id, run_id, step_index, server, tool, arguments, status, result, error, \
         started_at, completed_at FROM workflow_steps WHERE run_id = ?1 ORDER BY step_index",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    rows.into_iter().map(row_to_step).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_test_db, workflows};
    use crate::workflow::NewWorkflow;
    use serde_json::{json, Map};

    async fn seed_workflow(pool: &DbPool) -> i64 {
        workflows::insert(
            pool,
            &NewWorkflow {
                name: "audit-test".to_string(),
                description: None,
                trigger_event: "scrum:sprint-completed".to_string(),
                trigger_conditions: Map::new(),
                steps: vec![],
            },
        )
        .await
        .expect("seed workflow")
        .id
    }

    #[tokio::test]
    async fn run_lifecycle_completed() {
        let pool = init_test_db().await.expect("init db");
        let workflow_id = seed_workflow(&pool).await;

        let payload = json!({ "sprintName": "Sprint-7" });
        let (run_id, started_at) = insert_run(&pool, workflow_id, &payload).await.expect("insert run");

        let run = get_run(&pool, run_id).await.expect("get").expect("exists");
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.trigger_payload, payload);
        assert_eq!(run.started_at, started_at);
        assert!(run.completed_at.is_none());

        finish_run(&pool, run_id, None, &now_iso(), 125).await.expect("finish");
        let run = get_run(&pool, run_id).await.expect("get").expect("exists");
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.duration_ms, Some(125));
        assert!(run.error.is_none());
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn run_lifecycle_failed() {
        let pool = init_test_db().await.expect("init db");
        let workflow_id = seed_workflow(&pool).await;
        let (run_id, _) = insert_run(&pool, workflow_id, &json!({})).await.expect("insert run");

        finish_run(&pool, run_id, Some("connection to 'x' failed"), &now_iso(), 40)
            .await
            .expect("finish");

        let run = get_run(&pool, run_id).await.expect("get").expect("exists");
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("connection to 'x' failed"));
    }

    #[tokio::test]
    async fn steps_persist_in_execution_order() {
        let pool = init_test_db().await.expect("init db");
        let workflow_id = seed_workflow(&pool).await;
        let (run_id, _) = insert_run(&pool, workflow_id, &json!({})).await.expect("insert run");

        let first = insert_step(&pool, run_id, 0, "scrum-board", "get-sprint", &json!({ "id": 1 }))
            .await
            .expect("step 0");
        complete_step(&pool, first, &json!({ "sprintId": "S1" })).await.expect("complete");

        let second = insert_step(&pool, run_id, 1, "retro-manager", "create-retro", &json!({}))
            .await
            .expect("step 1");
        fail_step(&pool, second, "tool returned an error envelope").await.expect("fail");

        let steps = steps_for_run(&pool, run_id).await.expect("steps");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_index, 0);
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[0].result, Some(json!({ "sprintId": "S1" })));
        assert_eq!(steps[1].step_index, 1);
        assert_eq!(steps[1].status, StepStatus::Failed);
        assert_eq!(steps[1].error.as_deref(), Some("tool returned an error envelope"));
        assert!(steps[1].result.is_none());
    }

    #[tokio::test]
    async fn get_run_with_steps_joins() {
        let pool = init_test_db().await.expect("init db");
        let workflow_id = seed_workflow(&pool).await;
        let (run_id, _) = insert_run(&pool, workflow_id, &json!({})).await.expect("insert run");
        insert_step(&pool, run_id, 0, "a", "b", &json!({})).await.expect("step");

        let joined = get_run_with_steps(&pool, run_id)
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(joined.run.id, run_id);
        assert_eq!(joined.steps.len(), 1);

        assert!(get_run_with_steps(&pool, 999).await.expect("query").is_none());
    }

    #[tokio::test]
    async fn list_runs_filters_and_limits() {
        let pool = init_test_db().await.expect("init db");
        let a = seed_workflow(&pool).await;
        let b = seed_workflow(&pool).await;
        for _ in 0..3 {
            insert_run(&pool, a, &json!({})).await.expect("run a");
        }
        insert_run(&pool, b, &json!({})).await.expect("run b");

        let all = list_runs(&pool, None, 10).await.expect("list");
        assert_eq!(all.len(), 4);

        let only_a = list_runs(&pool, Some(a), 10).await.expect("list a");
        assert_eq!(only_a.len(), 3);

        let limited = list_runs(&pool, Some(a), 2).await.expect("list limited");
        assert_eq!(limited.len(), 2);
        // Newest first.
        assert!(limited[0].id > limited[1].id);
    }
}
