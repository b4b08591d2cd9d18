// Shared helpers for the HTTP integration tests
// Every test drives the production router in-process against the in-memory store.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use conductor_control_plane::{app, AppConfig, AppState};
use conductor_storage::{password::hash_password, CreateProjectRow, CreateUserRow, StorageBackend};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

pub const PASSWORD: &str = "correct horse battery staple";

pub struct TestApp {
    pub store: StorageBackend,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let store = StorageBackend::in_memory();
        let state = AppState::new(AppConfig::example(), store.clone()).unwrap();
        Self {
            store,
            router: app(state),
        }
    }

    pub fn with_state(store: StorageBackend, state: AppState) -> Self {
        Self {
            store,
            router: app(state),
        }
    }

    pub async fn user(&self, username: &str) -> i64 {
        self.store
            .create_user(CreateUserRow {
                username: username.to_string(),
                name: username.to_string(),
                email: format!("{}@example.com", username),
                password_hash: Some(hash_password(PASSWORD).unwrap()),
                admin: false,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn project(&self, name: &str, owner_id: i64) -> i64 {
        self.store
            .create_project(CreateProjectRow {
                name: name.to_string(),
                owner_id,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn add_member(&self, project_id: i64, user_id: i64, admin: bool) {
        self.store
            .add_project_member(project_id, user_id, admin)
            .await
            .unwrap()
            .unwrap();
    }

    /// Log in and return the `name=value` pair of the session cookie
    pub async fn login(&self, username: &str) -> String {
        let response = self
            .send(
                Request::post("/api/auth/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        serde_json::json!({"auth": username, "password": PASSWORD}).to_string(),
                    ))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        let set_cookie = response.set_cookie.expect("login sets a cookie");
        set_cookie.split(';').next().unwrap().to_string()
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).to_string(),
            ))
        };
        TestResponse {
            status,
            body,
            set_cookie,
        }
    }

    /// Send a request authenticated with the given credential
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        auth: &Auth,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        builder = match auth {
            Auth::None => builder,
            Auth::Cookie(cookie) => builder.header(header::COOKIE, cookie.as_str()),
            Auth::Token(token) => {
                builder.header(header::AUTHORIZATION, format!("Bearer {}", token))
            }
        };
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }
}

pub enum Auth {
    None,
    Cookie(String),
    Token(String),
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub set_cookie: Option<String>,
}
