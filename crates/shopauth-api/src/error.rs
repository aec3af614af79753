//! API error handling
//!
//! Failures surface as `{timestamp, status, error, message, path}`.
//! Internal and database failures render a generic message; details go to the log.
//!
//! Author: hephaex@gmail.com

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::service::AuthError;
use crate::auth::jwt::TokenError;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// When the error was produced
    pub timestamp: DateTime<Utc>,
    /// HTTP status code
    pub status: u16,
    /// HTTP reason phrase
    pub error: String,
    /// Human-readable message
    pub message: String,
    /// Request path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
    Database(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn to_api_error(&self) -> ApiError {
        let status = self.status();
        match self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg) => ApiError::new(status, msg.clone()),
            AppError::NotFound(resource) => ApiError::new(status, format!("{resource} not found")),
            AppError::Internal(details) => {
                tracing::error!("Internal error: {}", details);
                ApiError::new(status, "Internal server error")
            }
            AppError::Database(details) => {
                tracing::error!("Database error: {}", details);
                ApiError::new(status, "Database operation failed")
            }
        }
    }

    /// Attach the request path reported in the error body
    pub fn at(self, path: &str) -> ErrorAt {
        ErrorAt {
            error: self,
            path: path.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_api_error())).into_response()
    }
}

/// An [`AppError`] bound to the path of the request that produced it
#[derive(Debug)]
pub struct ErrorAt {
    pub error: AppError,
    pub path: String,
}

impl IntoResponse for ErrorAt {
    fn into_response(self) -> Response {
        let body = self.error.to_api_error().with_path(self.path);
        (self.error.status(), Json(body)).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => {
                AppError::Unauthorized("Invalid username or password.".to_string())
            }
            AuthError::UsernameTaken(_) => AppError::BadRequest(err.to_string()),
            AuthError::RoleMissing(role) => {
                AppError::Internal(format!("default role '{role}' is not configured"))
            }
            AuthError::RefreshTokenNotFound | AuthError::RefreshTokenExpired => {
                AppError::Forbidden(err.to_string())
            }
            AuthError::Validation(msg) => AppError::BadRequest(msg),
            AuthError::Token(TokenError::InvalidArgument(msg)) => AppError::BadRequest(msg),
            AuthError::Token(e) => AppError::Internal(format!("token issuance failed: {e}")),
            AuthError::Store(e) => AppError::Database(e.to_string()),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
