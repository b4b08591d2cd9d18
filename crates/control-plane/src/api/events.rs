// Event log API routes
// Decision: Events are an audit trail of changes made through this API
// Decision: Visibility follows membership; /api/events only spans the caller's projects
// Decision: Recording is best effort; a failed write is logged, the change itself stands

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use conductor_storage::{CreateEventRow, EventRow};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common::ListResponse;
use crate::access::ProjectScope;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 200;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Event {
    pub id: i64,
    pub project_id: i64,
    pub user_id: Option<i64>,
    /// "project", "user", or a resource collection such as "access_keys"
    pub object_type: String,
    pub object_id: Option<i64>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            user_id: row.user_id,
            object_type: row.object_type,
            object_id: row.object_id,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct EventQuery {
    /// Maximum number of events, newest first (default 200, at most 1000)
    pub limit: Option<i64>,
}

impl EventQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Events across the caller's projects (mounted under /api)
pub fn routes() -> Router<AppState> {
    Router::new().route("/events", get(list_events))
}

/// Events of one project (nested under /api/project/:project_id)
pub fn project_routes() -> Router<AppState> {
    Router::new().route("/events", get(list_project_events))
}

/// Record a change in the project's event log
pub(crate) async fn record(
    state: &AppState,
    project_id: i64,
    user_id: i64,
    object_type: &str,
    object_id: Option<i64>,
    description: String,
) {
    let event = CreateEventRow {
        project_id,
        user_id: Some(user_id),
        object_type: object_type.to_string(),
        object_id,
        description,
    };
    if let Err(e) = state.store.record_event(event).await {
        tracing::warn!(project_id, object_type, error = %e, "Failed to record event");
    }
}

/// GET /api/events - Events of every project the caller belongs to
#[utoipa::path(
    get,
    path = "/api/events",
    params(EventQuery),
    responses(
        (status = 200, description = "Events, newest first", body = ListResponse<Event>),
        (status = 401, description = "Unauthorized")
    ),
    tag = "events"
)]
pub async fn list_events(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<EventQuery>,
) -> Result<Json<ListResponse<Event>>, ApiError> {
    let rows = state
        .store
        .list_events_for_user(user.id, query.limit())
        .await?;
    Ok(Json(ListResponse::new(
        rows.into_iter().map(Event::from).collect(),
    )))
}

/// GET /api/project/:project_id/events - Events of one project
#[utoipa::path(
    get,
    path = "/api/project/{project_id}/events",
    params(("project_id" = i64, Path, description = "Project ID"), EventQuery),
    responses(
        (status = 200, description = "Events, newest first", body = ListResponse<Event>),
        (status = 404, description = "Project not found")
    ),
    tag = "events"
)]
pub async fn list_project_events(
    State(state): State<AppState>,
    scope: ProjectScope,
    Query(query): Query<EventQuery>,
) -> Result<Json<ListResponse<Event>>, ApiError> {
    let rows = state
        .store
        .list_project_events(scope.project.id, query.limit())
        .await?;
    Ok(Json(ListResponse::new(
        rows.into_iter().map(Event::from).collect(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(EventQuery::default().limit(), DEFAULT_LIMIT);
        assert_eq!(EventQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(EventQuery { limit: Some(-5) }.limit(), 1);
        assert_eq!(EventQuery { limit: Some(50) }.limit(), 50);
        assert_eq!(EventQuery { limit: Some(1_000_000) }.limit(), MAX_LIMIT);
    }
}
