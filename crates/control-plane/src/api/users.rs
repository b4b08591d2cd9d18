// Users API routes
// Decision: Any authenticated user can list users (needed to add project members)
// Decision: Creating users and granting system admin is reserved to system admins

use axum::{
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use conductor_storage::{password::hash_password, CreateUserRow, UpdateUser, UserRow};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common::{required_name, ListResponse};
use crate::access::{user_target_guard, TargetUser};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// User response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub email: String,
    /// System-wide administrator
    pub admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            name: row.name,
            email: row.email,
            admin: row.admin,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub username: String,
    pub name: String,
    pub email: String,
    /// Initial password. Users without one cannot log in until it is set.
    pub password: Option<String>,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    /// Only system admins may change this
    pub admin: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

/// Create users routes (mounted under /api, behind authentication)
pub fn routes(state: AppState) -> Router<AppState> {
    let target = Router::new()
        .route("/users/:user_id", put(update_user))
        .route("/users/:user_id/password", post(update_password))
        .route_layer(from_fn_with_state(state, user_target_guard));

    Router::new()
        .route("/users", get(list_users).post(create_user))
        .merge(target)
}

/// GET /api/users - List all users
#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "List of users", body = ListResponse<User>),
        (status = 401, description = "Unauthorized")
    ),
    tag = "users"
)]
pub async fn list_users(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<ListResponse<User>>, ApiError> {
    let users = state.store.list_users().await?;
    Ok(Json(ListResponse::new(
        users.into_iter().map(User::from).collect(),
    )))
}

/// POST /api/users - Create a user (system admin only)
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "System admin required"),
        (status = 409, description = "Username or email already taken")
    ),
    tag = "users"
)]
pub async fn create_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    if !caller.admin {
        return Err(ApiError::forbidden("System admin access required"));
    }

    let username = required_name("username", &req.username)?;
    let name = required_name("name", &req.name)?;
    let email = required_name("email", &req.email)?;
    ensure_login_free(&state, &username, None).await?;
    ensure_login_free(&state, &email, None).await?;

    let password_hash = match req.password.as_deref() {
        Some(password) if !password.is_empty() => Some(hash_password(password)?),
        _ => None,
    };

    let user = state
        .store
        .create_user(CreateUserRow {
            username,
            name,
            email,
            password_hash,
            admin: req.admin,
        })
        .await?;

    tracing::info!(user_id = user.id, created_by = caller.id, "User created");
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// PUT /api/users/:user_id - Update a user (self or system admin)
#[utoipa::path(
    put,
    path = "/api/users/{user_id}",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 403, description = "Not allowed to modify this user"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Username or email already taken")
    ),
    tag = "users"
)]
pub async fn update_user(
    State(state): State<AppState>,
    caller: AuthUser,
    TargetUser(target): TargetUser,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    if req.admin.is_some_and(|admin| admin != target.admin) && !caller.admin {
        return Err(ApiError::forbidden("System admin access required"));
    }

    let username = req
        .username
        .as_deref()
        .map(|v| required_name("username", v))
        .transpose()?;
    let name = req
        .name
        .as_deref()
        .map(|v| required_name("name", v))
        .transpose()?;
    let email = req
        .email
        .as_deref()
        .map(|v| required_name("email", v))
        .transpose()?;

    if let Some(username) = &username {
        ensure_login_free(&state, username, Some(target.id)).await?;
    }
    if let Some(email) = &email {
        ensure_login_free(&state, email, Some(target.id)).await?;
    }

    let user = state
        .store
        .update_user(
            target.id,
            UpdateUser {
                username,
                name,
                email,
                password_hash: None,
                admin: req.admin,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    Ok(Json(user.into()))
}

/// POST /api/users/:user_id/password - Set a user's password (self or system admin)
#[utoipa::path(
    post,
    path = "/api/users/{user_id}/password",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = UpdatePasswordRequest,
    responses(
        (status = 204, description = "Password updated"),
        (status = 400, description = "Empty password"),
        (status = 403, description = "Not allowed to modify this user"),
        (status = 404, description = "User not found")
    ),
    tag = "users"
)]
pub async fn update_password(
    State(state): State<AppState>,
    TargetUser(target): TargetUser,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    if req.password.is_empty() {
        return Err(ApiError::BadRequest("password must not be empty".to_string()));
    }

    let update = UpdateUser {
        password_hash: Some(hash_password(&req.password)?),
        ..UpdateUser::default()
    };
    state
        .store
        .update_user(target.id, update)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    tracing::info!(user_id = target.id, "Password updated");
    Ok(StatusCode::NO_CONTENT)
}

/// Fail with Conflict if `login` (username or email) belongs to another user
async fn ensure_login_free(
    state: &AppState,
    login: &str,
    except_user: Option<i64>,
) -> Result<(), ApiError> {
    match state.store.get_user_by_login(login).await? {
        Some(existing) if Some(existing.id) != except_user => Err(ApiError::Conflict(format!(
            "'{}' is already taken",
            login
        ))),
        _ => Ok(()),
    }
}
