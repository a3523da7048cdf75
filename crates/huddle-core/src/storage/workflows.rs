//! CRUD operations for the `workflows` table.
//!
//! Definitions are mutable only via insert and the active toggle; the
//! trigger conditions and step list are stored as JSON text.

use serde_json::{Map, Value};

use super::{now_iso, DbPool};
use crate::error::StorageError;
use crate::workflow::{NewWorkflow, StepSpec, Workflow};

type WorkflowRow = (
    i64,
    String,
    Option<String>,
    String,
    String,
    String,
    i64,
    String,
    String,
);

fn row_to_workflow(row: WorkflowRow) -> Result<Workflow, StorageError> {
    let (id, name, description, trigger_event, conditions, steps, active, created_at, updated_at) =
        row;
    let trigger_conditions: Map<String, Value> =
        serde_json::from_str(&conditions).map_err(|e| StorageError::CorruptJson {
            column: "workflows.trigger_conditions".to_string(),
            message: e.to_string(),
        })?;
    let steps: Vec<StepSpec> = serde_json::from_str(&steps).map_err(|e| StorageError::CorruptJson {
        column: "workflows.steps".to_string(),
        message: e.to_string(),
    })?;
    Ok(Workflow {
        id,
        name,
        description,
        trigger_event,
        trigger_conditions,
        steps,
        active: active != 0,
        created_at,
        updated_at,
    })
}

/// Persist a new definition, active by default. Returns the stored row.
pub async fn insert(pool: &DbPool, new: &NewWorkflow) -> Result<Workflow, StorageError> {
    let now = now_iso();
    let conditions = serde_json::to_string(&new.trigger_conditions).unwrap_or_else(|_| "{}".into());
    let steps = serde_json::to_string(&new.steps).unwrap_or_else(|_| "[]".into());

    let result = sqlx::query(
        "INSERT INTO workflows \
         (name, description, trigger_event, trigger_conditions, steps, active, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
    )
    .bind(&new.name)
    .bind(&new.description)
    .bind(&new.trigger_event)
    .bind(&conditions)
    .bind(&steps)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(Workflow {
        id: result.last_insert_rowid(),
        name: new.name.clone(),
        description: new.description.clone(),
        trigger_event: new.trigger_event.clone(),
        trigger_conditions: new.trigger_conditions.clone(),
        steps: new.steps.clone(),
        active: true,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Fetch one definition by id. Returns `None` if it does not exist.
pub async fn get(pool: &DbPool, id: i64) -> Result<Option<Workflow>, StorageError> {
    let row: Option<WorkflowRow> = sqlx::query_as(
        "SELECT id, name, description, trigger_event, trigger_conditions, steps, active, \
         created_at, updated_at FROM workflows WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    row.map(row_to_workflow).transpose()
}

/// List definitions, optionally restricted to active ones, newest first.
pub async fn list(pool: &DbPool, active_only: bool) -> Result<Vec<Workflow>, StorageError> {
    let sql = if active_only {
        "SELECT id, name, description, trigger_event, trigger_conditions, steps, active, \
         created_at, updated_at FROM workflows WHERE active = 1 ORDER BY id DESC"
    } else {
        "SELECT id, name, description, trigger_event, trigger_conditions, steps, active, \
         created_at, updated_at FROM workflows ORDER BY id DESC"
    };
    let rows: Vec<WorkflowRow> = sqlx::query_as(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    rows.into_iter().map(row_to_workflow).collect()
}

/// Active definitions whose trigger equals the given event name.
pub async fn active_for_event(pool: &DbPool, event: &str) -> Result<Vec<Workflow>, StorageError> {
    let rows: Vec<WorkflowRow> = sqlx::query_as(
        "SELECT id, name, description, trigger_event, trigger_conditions, steps, active, \
         created_at, updated_at FROM workflows WHERE active = 1 AND trigger_event = ?1 \
         ORDER BY id",
    )
    .bind(event)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    rows.into_iter().map(row_to_workflow).collect()
}

/// Flip the active flag. Returns `false` if the id does not exist.
pub async fn set_active(pool: &DbPool, id: i64, active: bool) -> Result<bool, StorageError> {
    let result = sqlx::query("UPDATE workflows SET active = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(i64::from(active))
        .bind(now_iso())
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() > 0)
}
