// Authentication guard and the AuthUser extractor
// Decision: Authentication runs once per request as middleware; handlers and
// later guards read the result from request extensions
// Decision: Extractors fail closed when the guard did not run

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use conductor_storage::UserRow;

use super::identity::{AuthMethod, Identity};
use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated user context attached to the request
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub email: String,
    /// System-wide administrator
    pub admin: bool,
    /// Authentication method used
    pub method: AuthMethod,
}

impl AuthUser {
    pub fn from_row(user: UserRow, method: AuthMethod) -> Self {
        Self {
            id: user.id,
            username: user.username,
            name: user.name,
            email: user.email,
            admin: user.admin,
            method,
        }
    }
}

/// Reject requests without a resolvable identity, attach `AuthUser` otherwise
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = state.resolver.resolve(request.headers()).await?;

    let Identity::User { user_id, method } = identity else {
        tracing::info!(path = %request.uri().path(), "Unauthenticated request rejected");
        return Err(ApiError::Unauthenticated);
    };

    let Some(user) = state.credentials.find_user_by_id(user_id).await? else {
        tracing::info!(user_id, "Credentials refer to a missing user");
        return Err(ApiError::Unauthenticated);
    };

    request
        .extensions_mut()
        .insert(AuthUser::from_row(user, method));
    Ok(next.run(request).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    #[tokio::test]
    async fn test_extractor_fails_closed() {
        let (mut parts, _) = HttpRequest::builder()
            .uri("/api/user")
            .body(())
            .unwrap()
            .into_parts();
        let result = AuthUser::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(ApiError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_extractor_reads_extension() {
        let (mut parts, _) = HttpRequest::builder()
            .uri("/api/user")
            .body(())
            .unwrap()
            .into_parts();
        parts.extensions.insert(AuthUser {
            id: 3,
            username: "carol".to_string(),
            name: "Carol".to_string(),
            email: "carol@example.com".to_string(),
            admin: false,
            method: AuthMethod::ApiToken,
        });

        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.id, 3);
        assert_eq!(user.method, AuthMethod::ApiToken);
    }
}
