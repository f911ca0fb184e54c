//! Task handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use openapi_server::models::{TaskListResponse, TaskSummary};
use uuid::Uuid;

use crate::errors::EnvError;
use crate::models::task::Task;
use crate::server::pipeline::{Pipeline, RequestContext};
use crate::server::state::ServerState;

fn summarize(task: &Task) -> TaskSummary {
    TaskSummary {
        id: task.id,
        environment_id: task.environment_id,
        operation: task.operation.as_str().to_string(),
        status: task.status.as_str().to_string(),
        outcomes: task.outcomes.len(),
        failed: task.failed_outcomes().count(),
        created_at: task.created_at,
        updated_at: task.updated_at,
    }
}

pub async fn get_task_handler(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<Uuid>,
    mut ctx: RequestContext,
) -> Result<Json<Task>, EnvError> {
    Pipeline::read().run(&mut ctx, &state).await?;

    Ok(Json(state.tasks.get(task_id)?))
}

/// Tasks newest first, optionally filtered with `?environment=<id>`
pub async fn list_tasks_handler(
    State(state): State<Arc<ServerState>>,
    mut ctx: RequestContext,
) -> Result<Json<TaskListResponse>, EnvError> {
    Pipeline::read().run(&mut ctx, &state).await?;

    let environment_id = ctx
        .query
        .get("environment")
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|_| EnvError::ValidationError(format!("invalid environment id: {}", raw)))
        })
        .transpose()?;

    let tasks: Vec<TaskSummary> = state.tasks.list(environment_id).iter().map(summarize).collect();
    let total = tasks.len();
    Ok(Json(TaskListResponse { tasks, total }))
}
