// Authentication HTTP routes
// Decision: Login sets a sealed session cookie scoped to /api; no token in the body
// Decision: Token ids are the token digests; the full token is returned only once

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use conductor_storage::{
    password::{check_password, hash_password},
    ApiTokenRow, CreateApiTokenRow,
};
use std::sync::OnceLock;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{api_token::generate_api_token, middleware::AuthUser, session::SESSION_COOKIE};
use crate::api::common::ListResponse;
use crate::api::users::User;
use crate::error::ApiError;
use crate::state::AppState;

/// Longest lifetime a token may be created with
const MAX_TOKEN_DAYS: i64 = 3650;

/// Hash verified in place of a missing one. Same Argon2 parameters as real
/// password hashes.
fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password("conductor-dummy-password").ok())
        .as_deref()
}

/// Login request
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email
    #[schema(example = "admin")]
    pub auth: String,
    pub password: String,
}

/// API token list item (without the token value)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiToken {
    pub id: String,
    pub token_prefix: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
}

impl From<ApiTokenRow> for ApiToken {
    fn from(row: ApiTokenRow) -> Self {
        Self {
            id: row.id,
            token_prefix: row.token_prefix,
            created_at: row.created_at,
            expires_at: row.expires_at,
            expired: row.expired,
        }
    }
}

/// API token response (shown only once at creation)
#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedApiToken {
    pub id: String,
    /// Full token value. Store it now; it cannot be retrieved again.
    pub token: String,
    pub token_prefix: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Create API token request
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateApiTokenRequest {
    /// Expiration in days (optional, never expires if omitted)
    pub expires_in_days: Option<i64>,
}

/// Routes reachable without authentication
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
}

/// Routes for the authenticated user (mounted under /api)
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/user", get(get_current_user))
        .route("/user/tokens", get(list_api_tokens).post(create_api_token))
        .route("/user/tokens/:token_id", delete(expire_api_token))
}

/// POST /api/auth/login - Login with username or email and password
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 204, description = "Logged in, session cookie set"),
        (status = 401, description = "Invalid login or password", body = crate::api::common::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, StatusCode), ApiError> {
    let login = req.auth.trim();
    if login.is_empty() || req.password.is_empty() {
        return Err(ApiError::InvalidCredentials);
    }

    let user = state.store.get_user_by_login(login).await?;

    // Unknown logins and password-less accounts still pay for one Argon2
    // verification, so response time does not reveal which usernames exist
    let stored_hash = user
        .as_ref()
        .and_then(|u| u.password_hash.as_deref())
        .or_else(|| dummy_hash());
    let password_ok = check_password(&req.password, stored_hash)?;

    let user = match user {
        Some(user) if password_ok && user.password_hash.is_some() => user,
        Some(user) => {
            tracing::info!(user_id = user.id, "Failed login attempt");
            return Err(ApiError::InvalidCredentials);
        }
        None => return Err(ApiError::InvalidCredentials),
    };

    let value = state
        .codec
        .seal(user.id)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to seal session: {}", e)))?;

    let cookie = Cookie::build((SESSION_COOKIE, value))
        .path("/api")
        .http_only(true)
        .secure(state.config.cookie_secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(state.codec.max_age().num_seconds()))
        .build();

    tracing::info!(user_id = user.id, "User logged in");
    Ok((jar.add(cookie), StatusCode::NO_CONTENT))
}

/// POST /api/auth/logout - Clear the session cookie
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses((status = 204, description = "Session cookie cleared")),
    tag = "auth"
)]
pub async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/api")),
        StatusCode::NO_CONTENT,
    )
}

/// GET /api/user - Current user
#[utoipa::path(
    get,
    path = "/api/user",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn get_current_user(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<User>, ApiError> {
    let row = state
        .store
        .get_user(user.id)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    Ok(Json(row.into()))
}

/// GET /api/user/tokens - List the current user's API tokens
#[utoipa::path(
    get,
    path = "/api/user/tokens",
    responses(
        (status = 200, description = "API tokens", body = ListResponse<ApiToken>),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn list_api_tokens(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ListResponse<ApiToken>>, ApiError> {
    let tokens = state.store.list_api_tokens_for_user(user.id).await?;
    Ok(Json(ListResponse::new(
        tokens.into_iter().map(ApiToken::from).collect(),
    )))
}

/// POST /api/user/tokens - Create an API token
#[utoipa::path(
    post,
    path = "/api/user/tokens",
    request_body = CreateApiTokenRequest,
    responses(
        (status = 201, description = "Token created", body = CreatedApiToken),
        (status = 400, description = "Invalid expiration"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn create_api_token(
    State(state): State<AppState>,
    user: AuthUser,
    body: Option<Json<CreateApiTokenRequest>>,
) -> Result<(StatusCode, Json<CreatedApiToken>), ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let expires_at = match req.expires_in_days {
        Some(days) if !(1..=MAX_TOKEN_DAYS).contains(&days) => {
            return Err(ApiError::BadRequest(format!(
                "expires_in_days must be between 1 and {}",
                MAX_TOKEN_DAYS
            )));
        }
        Some(days) => Some(Utc::now() + Duration::days(days)),
        None => None,
    };

    let generated = generate_api_token();
    let row = state
        .store
        .create_api_token(CreateApiTokenRow {
            id: generated.digest,
            user_id: user.id,
            token_prefix: generated.display_prefix,
            expires_at,
        })
        .await?;

    tracing::info!(user_id = user.id, token_prefix = %row.token_prefix, "API token created");

    Ok((
        StatusCode::CREATED,
        Json(CreatedApiToken {
            id: row.id,
            token: generated.token, // Full token shown only once!
            token_prefix: row.token_prefix,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }),
    ))
}

/// DELETE /api/user/tokens/:token_id - Revoke an API token
#[utoipa::path(
    delete,
    path = "/api/user/tokens/{token_id}",
    params(("token_id" = String, Path, description = "Token id")),
    responses(
        (status = 204, description = "Token revoked"),
        (status = 404, description = "Token not found")
    ),
    tag = "auth"
)]
pub async fn expire_api_token(
    State(state): State<AppState>,
    user: AuthUser,
    Path(token_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.store.expire_api_token(&token_id, user.id).await? {
        return Err(ApiError::not_found("Token"));
    }
    tracing::info!(user_id = user.id, "API token revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(hash: &str) -> String {
        // $argon2id$v=19$m=..,t=..,p=..$salt$hash
        hash.split('$').take(4).collect::<Vec<_>>().join("$")
    }

    #[test]
    fn test_dummy_hash_costs_the_same_as_real_ones() {
        let dummy = dummy_hash().unwrap();
        let real = hash_password("hunter2").unwrap();

        assert_eq!(params(dummy), params(&real));
        assert!(!check_password("hunter2", Some(dummy)).unwrap());
        // Stable across calls
        assert_eq!(dummy_hash(), Some(dummy));
    }
}
