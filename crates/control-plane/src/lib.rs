// Conductor Control Plane Library
// Decision: Shared library for binaries (API server, OpenAPI export) and tests
// Decision: The routing table lives here so tests drive the exact production router

// Project-scoped authorization guards
pub mod access;

// API routes and types (shared for OpenAPI generation)
pub mod api;

// Authentication module
pub mod auth;

pub mod config;
pub mod error;

// OpenAPI spec generation
pub mod openapi;

pub mod state;

// Store doubles for tests; compiled out of release builds
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::AppConfig;
pub use error::ApiError;
pub use state::AppState;

use anyhow::Result;
use axum::{middleware::from_fn_with_state, routing::get, Router};
use conductor_storage::{password::hash_password, CreateUserRow, StorageBackend};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AdminConfig;
use crate::openapi::ApiDoc;

/// GET /api/ping - Liveness check
async fn ping() -> &'static str {
    "PONG"
}

/// Build the full application router.
///
/// Public: /api/ping, /api/auth/*, Swagger UI. Everything else under /api
/// passes the authentication guard first.
pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .merge(auth::routes::routes())
        .merge(api::projects::routes())
        .merge(api::users::routes(state.clone()))
        .merge(api::events::routes())
        .nest("/project/:project_id", api::project_routes(state.clone()))
        .layer(from_fn_with_state(state.clone(), auth::authenticate));

    Router::new()
        .route("/api/ping", get(ping))
        .merge(auth::routes::public_routes())
        .nest("/api", protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

/// Create the configured admin account unless a user with that username exists.
/// Returns true if an account was created.
pub async fn seed_admin(store: &StorageBackend, admin: &AdminConfig) -> Result<bool> {
    if store.get_user_by_login(&admin.username).await?.is_some() {
        tracing::debug!(username = %admin.username, "Admin account already exists");
        return Ok(false);
    }

    let user = store
        .create_user(CreateUserRow {
            username: admin.username.clone(),
            name: admin
                .name
                .clone()
                .unwrap_or_else(|| admin.username.clone()),
            email: admin.email.clone(),
            password_hash: Some(hash_password(&admin.password)?),
            admin: true,
        })
        .await?;

    tracing::info!(user_id = user.id, username = %user.username, "Admin account created");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let state = AppState::new(AppConfig::example(), StorageBackend::in_memory()).unwrap();
        app(state)
    }

    #[tokio::test]
    async fn test_ping_is_public() {
        let response = test_app()
            .oneshot(Request::builder().uri("/api/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"PONG");
    }

    #[tokio::test]
    async fn test_protected_routes_require_auth() {
        for uri in ["/api/user", "/api/projects", "/api/users", "/api/project/1"] {
            let response = test_app()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_openapi_document_served() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_seed_admin_once() {
        let store = StorageBackend::in_memory();
        let admin = AdminConfig {
            username: "admin".to_string(),
            email: "admin@example.com".to_string(),
            password: "hunter2".to_string(),
            name: None,
        };

        assert!(seed_admin(&store, &admin).await.unwrap());
        assert!(!seed_admin(&store, &admin).await.unwrap());

        let user = store.get_user_by_login("admin").await.unwrap().unwrap();
        assert!(user.admin);
        assert_eq!(user.name, "admin");
    }
}
