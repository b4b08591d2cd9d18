// Task output API routes
// Decision: Output is an append-only list of lines in insertion order
// Decision: Nothing here runs tasks; a runner appends output through this API

use axum::{
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use conductor_storage::TaskOutputRow;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common::ListResponse;
use crate::access::{resource_guard, Scoped, Tasks};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskOutput {
    pub task_id: i64,
    pub output: String,
    pub time: DateTime<Utc>,
}

impl From<TaskOutputRow> for TaskOutput {
    fn from(row: TaskOutputRow) -> Self {
        Self {
            task_id: row.task_id,
            output: row.output,
            time: row.recorded_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AppendOutputRequest {
    pub output: String,
}

/// Task output routes (nested under /api/project/:project_id)
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/tasks/:task_id/output",
            get(get_task_output).post(append_task_output),
        )
        .route_layer(from_fn_with_state(state, resource_guard::<Tasks>))
}

/// GET /api/project/:project_id/tasks/:task_id/output - Task output lines
#[utoipa::path(
    get,
    path = "/api/project/{project_id}/tasks/{task_id}/output",
    params(
        ("project_id" = i64, Path, description = "Project ID"),
        ("task_id" = i64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task output", body = ListResponse<TaskOutput>),
        (status = 404, description = "Project or task not found")
    ),
    tag = "tasks"
)]
pub async fn get_task_output(
    State(state): State<AppState>,
    task: Scoped<Tasks>,
) -> Result<Json<ListResponse<TaskOutput>>, ApiError> {
    let rows = state.store.list_task_output(task.row.id).await?;
    Ok(Json(ListResponse::new(
        rows.into_iter().map(TaskOutput::from).collect(),
    )))
}

/// POST /api/project/:project_id/tasks/:task_id/output - Append an output line
#[utoipa::path(
    post,
    path = "/api/project/{project_id}/tasks/{task_id}/output",
    params(
        ("project_id" = i64, Path, description = "Project ID"),
        ("task_id" = i64, Path, description = "Task ID")
    ),
    request_body = AppendOutputRequest,
    responses(
        (status = 201, description = "Line recorded", body = TaskOutput),
        (status = 404, description = "Project or task not found")
    ),
    tag = "tasks"
)]
pub async fn append_task_output(
    State(state): State<AppState>,
    task: Scoped<Tasks>,
    Json(req): Json<AppendOutputRequest>,
) -> Result<(StatusCode, Json<TaskOutput>), ApiError> {
    let row = state
        .store
        .append_task_output(task.row.id, &req.output)
        .await?
        .ok_or_else(|| ApiError::not_found("Task"))?;
    Ok((StatusCode::CREATED, Json(row.into())))
}
