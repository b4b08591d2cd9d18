// Project membership and admin escalation guards
// Decision: One lookup returns membership joined with the project
// Decision: Non-members get the same response whether or not the project exists
// Decision: System administrators get no implicit membership

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use conductor_storage::ProjectRow;

use super::{path_id, scope_value, PathParams};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// The in-scope project and the caller's admin flag within it
#[derive(Debug, Clone)]
pub struct ProjectScope {
    pub project: ProjectRow,
    pub admin: bool,
}

/// Require the caller to be a member of `:project_id`; attach `ProjectScope`
pub async fn project_membership(
    State(state): State<AppState>,
    params: PathParams,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user: AuthUser = scope_value(request.extensions(), || ApiError::Unauthenticated)?;

    let Some(project_id) = path_id(&params, "project_id") else {
        tracing::debug!(user_id = user.id, "Unparseable project id");
        return Err(ApiError::project_not_found());
    };

    let Some(membership) = state.credentials.find_membership(user.id, project_id).await? else {
        tracing::debug!(user_id = user.id, project_id, "Not a project member");
        return Err(ApiError::project_not_found());
    };

    request.extensions_mut().insert(ProjectScope {
        project: membership.project,
        admin: membership.admin,
    });
    Ok(next.run(request).await)
}

/// Require the caller to be an admin of the in-scope project
pub async fn require_project_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let scope: ProjectScope = scope_value(request.extensions(), ApiError::project_not_found)?;

    if !scope.admin {
        tracing::info!(project_id = scope.project.id, "Project admin required");
        return Err(ApiError::forbidden("Project admin access required"));
    }
    Ok(next.run(request).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ProjectScope
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        scope_value(&parts.extensions, ApiError::project_not_found)
    }
}
