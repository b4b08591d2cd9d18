// API error type shared by guards and handlers
// Decision: One error enum for the whole request pipeline; every variant maps to
// exactly one status code and a `{"error": "..."}` body
// Decision: Internal errors never leak their cause to clients

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::common::ErrorResponse;

/// Message used for every project lookup failure, whether the project is
/// missing or the caller is not a member.
pub const PROJECT_NOT_FOUND: &str = "Project not found";

#[derive(Debug, Error)]
pub enum ApiError {
    /// No identity could be resolved for the request
    #[error("Authentication required")]
    Unauthenticated,

    /// Login attempt with a wrong login or password
    #[error("Invalid login or password")]
    InvalidCredentials,

    /// The identity lacks the rights for this operation
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} not found", what))
    }

    pub fn project_not_found() -> Self {
        Self::NotFound(PROJECT_NOT_FOUND.to_string())
    }

    pub fn forbidden(message: &str) -> Self {
        Self::Forbidden(message.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(e) => tracing::error!(error = %format!("{:#}", e), "Request failed"),
            Self::Unauthenticated | Self::InvalidCredentials | Self::Forbidden(_) => {
                tracing::info!(status = %self.status(), "{}", self)
            }
            _ => tracing::debug!(status = %self.status(), "{}", self),
        }

        (self.status(), Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}
