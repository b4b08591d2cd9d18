// Guards for routes that target another user
// Decision: Inside a project the target must be a member of that project
// Decision: Outside projects only the user themself or a system admin may act

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use conductor_storage::UserRow;

use super::{path_id, scope_value, PathParams, ProjectScope};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Target of a `/project/:project_id/users/:user_id` route
#[derive(Debug, Clone)]
pub struct ProjectMember {
    pub user_id: i64,
    pub admin: bool,
}

/// Target of a `/users/:user_id` route
#[derive(Debug, Clone)]
pub struct TargetUser(pub UserRow);

/// Require `:user_id` to be a member of the in-scope project; attach `ProjectMember`
pub async fn project_user_guard(
    State(state): State<AppState>,
    params: PathParams,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let scope: ProjectScope = scope_value(request.extensions(), ApiError::project_not_found)?;

    let Some(user_id) = path_id(&params, "user_id") else {
        return Err(ApiError::not_found("User"));
    };

    let Some(membership) = state
        .credentials
        .find_membership(user_id, scope.project.id)
        .await?
    else {
        tracing::debug!(
            user_id,
            project_id = scope.project.id,
            "Target user is not a project member"
        );
        return Err(ApiError::not_found("User"));
    };

    request.extensions_mut().insert(ProjectMember {
        user_id: membership.user_id,
        admin: membership.admin,
    });
    Ok(next.run(request).await)
}

/// Load `:user_id`; only that user or a system admin may continue
pub async fn user_target_guard(
    State(state): State<AppState>,
    params: PathParams,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let caller: AuthUser = scope_value(request.extensions(), || ApiError::Unauthenticated)?;

    let Some(user_id) = path_id(&params, "user_id") else {
        return Err(ApiError::not_found("User"));
    };
    let Some(target) = state.credentials.find_user_by_id(user_id).await? else {
        return Err(ApiError::not_found("User"));
    };

    if caller.id != target.id && !caller.admin {
        tracing::info!(
            user_id = caller.id,
            target_user_id = target.id,
            "Refused to modify another user"
        );
        return Err(ApiError::forbidden("Cannot modify another user"));
    }

    request.extensions_mut().insert(TargetUser(target));
    Ok(next.run(request).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ProjectMember
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        scope_value(&parts.extensions, || ApiError::not_found("User"))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for TargetUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        scope_value(&parts.extensions, || ApiError::not_found("User"))
    }
}
