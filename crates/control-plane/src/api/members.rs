// Project members API routes
// Decision: Listing is open to every member; changes are admin-only
// Decision: A project always keeps at least one admin

use axum::{
    extract::State,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use conductor_storage::{MemberChange, ProjectMemberRow};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{common::ListResponse, events};
use crate::access::{project_user_guard, require_project_admin, ProjectMember, ProjectScope};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// A project member
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProjectUser {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub email: String,
    /// Project admin (not system admin)
    pub admin: bool,
}

impl From<ProjectMemberRow> for ProjectUser {
    fn from(row: ProjectMemberRow) -> Self {
        Self {
            id: row.user.id,
            username: row.user.username,
            name: row.user.name,
            email: row.user.email,
            admin: row.admin,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddMemberRequest {
    pub user_id: i64,
    #[serde(default)]
    pub admin: bool,
}

/// Member routes (nested under /api/project/:project_id)
pub fn routes(state: AppState) -> Router<AppState> {
    // route_layer: the last one added runs first
    let member_admin = Router::new()
        .route(
            "/users/:user_id/admin",
            post(make_admin).delete(revoke_admin),
        )
        .route("/users/:user_id", axum::routing::delete(remove_member))
        .route_layer(from_fn_with_state(state, project_user_guard))
        .route_layer(from_fn(require_project_admin));

    Router::new()
        .route(
            "/users",
            get(list_members).merge(post(add_member).route_layer(from_fn(require_project_admin))),
        )
        .merge(member_admin)
}

/// GET /api/project/:project_id/users - List project members
#[utoipa::path(
    get,
    path = "/api/project/{project_id}/users",
    params(("project_id" = i64, Path, description = "Project ID")),
    responses(
        (status = 200, description = "Project members", body = ListResponse<ProjectUser>),
        (status = 404, description = "Project not found")
    ),
    tag = "members"
)]
pub async fn list_members(
    State(state): State<AppState>,
    scope: ProjectScope,
) -> Result<Json<ListResponse<ProjectUser>>, ApiError> {
    let members = state.store.list_project_members(scope.project.id).await?;
    Ok(Json(ListResponse::new(
        members.into_iter().map(ProjectUser::from).collect(),
    )))
}

/// POST /api/project/:project_id/users - Add a member (project admin only)
#[utoipa::path(
    post,
    path = "/api/project/{project_id}/users",
    params(("project_id" = i64, Path, description = "Project ID")),
    request_body = AddMemberRequest,
    responses(
        (status = 204, description = "Member added"),
        (status = 403, description = "Project admin required"),
        (status = 404, description = "Project or user not found"),
        (status = 409, description = "Already a member")
    ),
    tag = "members"
)]
pub async fn add_member(
    State(state): State<AppState>,
    user: AuthUser,
    scope: ProjectScope,
    Json(req): Json<AddMemberRequest>,
) -> Result<StatusCode, ApiError> {
    let Some(target) = state.store.get_user(req.user_id).await? else {
        return Err(ApiError::not_found("User"));
    };

    let added = state
        .store
        .add_project_member(scope.project.id, req.user_id, req.admin)
        .await?;
    if added.is_none() {
        return Err(ApiError::Conflict(
            "User is already a member of this project".to_string(),
        ));
    }

    tracing::info!(
        project_id = scope.project.id,
        user_id = req.user_id,
        admin = req.admin,
        "Project member added"
    );
    events::record(
        &state,
        scope.project.id,
        user.id,
        "user",
        Some(target.id),
        format!("User {} added to the project", target.username),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/project/{project_id}/users/{user_id}/admin",
    params(
        ("project_id" = i64, Path, description = "Project ID"),
        ("user_id" = i64, Path, description = "User ID")
    ),
    responses(
        (status = 204, description = "Admin granted"),
        (status = 403, description = "Project admin required"),
        (status = 404, description = "Project or member not found")
    ),
    tag = "members"
)]
pub async fn make_admin(
    State(state): State<AppState>,
    user: AuthUser,
    scope: ProjectScope,
    member: ProjectMember,
) -> Result<StatusCode, ApiError> {
    let change = state
        .store
        .set_project_member_admin(scope.project.id, member.user_id, true)
        .await?;
    finish(&state, &user, &scope, &member, change, "granted project admin").await
}

#[utoipa::path(
    delete,
    path = "/api/project/{project_id}/users/{user_id}/admin",
    params(
        ("project_id" = i64, Path, description = "Project ID"),
        ("user_id" = i64, Path, description = "User ID")
    ),
    responses(
        (status = 204, description = "Admin revoked"),
        (status = 403, description = "Project admin required"),
        (status = 404, description = "Project or member not found"),
        (status = 409, description = "Last admin of the project")
    ),
    tag = "members"
)]
pub async fn revoke_admin(
    State(state): State<AppState>,
    user: AuthUser,
    scope: ProjectScope,
    member: ProjectMember,
) -> Result<StatusCode, ApiError> {
    let change = state
        .store
        .set_project_member_admin(scope.project.id, member.user_id, false)
        .await?;
    finish(&state, &user, &scope, &member, change, "lost project admin").await
}

#[utoipa::path(
    delete,
    path = "/api/project/{project_id}/users/{user_id}",
    params(
        ("project_id" = i64, Path, description = "Project ID"),
        ("user_id" = i64, Path, description = "User ID")
    ),
    responses(
        (status = 204, description = "Member removed"),
        (status = 403, description = "Project admin required"),
        (status = 404, description = "Project or member not found"),
        (status = 409, description = "Last admin of the project")
    ),
    tag = "members"
)]
pub async fn remove_member(
    State(state): State<AppState>,
    user: AuthUser,
    scope: ProjectScope,
    member: ProjectMember,
) -> Result<StatusCode, ApiError> {
    let change = state
        .store
        .remove_project_member(scope.project.id, member.user_id)
        .await?;
    finish(&state, &user, &scope, &member, change, "removed from the project").await
}

/// Map a store outcome to a response and log the change.
/// The last-admin check happens inside the store write, atomically.
async fn finish(
    state: &AppState,
    user: &AuthUser,
    scope: &ProjectScope,
    member: &ProjectMember,
    change: MemberChange,
    what: &str,
) -> Result<StatusCode, ApiError> {
    match change {
        MemberChange::Applied => {}
        MemberChange::NotMember => return Err(ApiError::not_found("User")),
        MemberChange::LastAdmin => {
            return Err(ApiError::Conflict(
                "A project must keep at least one admin".to_string(),
            ))
        }
    }

    tracing::info!(
        project_id = scope.project.id,
        user_id = member.user_id,
        by = user.id,
        "Project member {}",
        what
    );
    events::record(
        state,
        scope.project.id,
        user.id,
        "user",
        Some(member.user_id),
        format!("User {} {}", member.user_id, what),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}
