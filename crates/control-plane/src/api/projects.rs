// Projects API routes
// Decision: The creator of a project becomes its first admin member

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use conductor_storage::{CreateProjectRow, ProjectRow};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common::{required_name, ListResponse};
use super::events;
use crate::access::ProjectScope;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

/// A project as seen by one of its members
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProjectView {
    pub project: Project,
    /// Whether the caller is an admin of this project
    pub admin: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    #[schema(example = "Production servers")]
    pub name: String,
}

/// Project collection routes (mounted under /api, behind authentication)
pub fn routes() -> Router<AppState> {
    Router::new().route("/projects", get(list_projects).post(create_project))
}

/// GET /api/projects - Projects the caller is a member of
#[utoipa::path(
    get,
    path = "/api/projects",
    responses(
        (status = 200, description = "Projects", body = ListResponse<Project>),
        (status = 401, description = "Unauthorized")
    ),
    tag = "projects"
)]
pub async fn list_projects(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ListResponse<Project>>, ApiError> {
    let projects = state.store.list_projects_for_user(user.id).await?;
    Ok(Json(ListResponse::new(
        projects.into_iter().map(Project::from).collect(),
    )))
}

/// POST /api/projects - Create a project
#[utoipa::path(
    post,
    path = "/api/projects",
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "projects"
)]
pub async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    let name = required_name("name", &req.name)?;
    let project = state
        .store
        .create_project(CreateProjectRow {
            name,
            owner_id: user.id,
        })
        .await?;

    tracing::info!(project_id = project.id, user_id = user.id, "Project created");
    events::record(
        &state,
        project.id,
        user.id,
        "project",
        Some(project.id),
        format!("Project {} created", project.name),
    )
    .await;
    Ok((StatusCode::CREATED, Json(project.into())))
}

/// GET /api/project/:project_id - The in-scope project
#[utoipa::path(
    get,
    path = "/api/project/{project_id}",
    params(("project_id" = i64, Path, description = "Project ID")),
    responses(
        (status = 200, description = "Project", body = ProjectView),
        (status = 404, description = "Project not found")
    ),
    tag = "projects"
)]
pub async fn get_project(scope: ProjectScope) -> Json<ProjectView> {
    Json(ProjectView {
        project: scope.project.into(),
        admin: scope.admin,
    })
}
