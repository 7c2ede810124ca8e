use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::middleware::request_id::current_request_id;

/// Business codes carried in the error envelope, distinct from HTTP status
pub mod code {
    pub const SUCCESS: u32 = 1000;
    pub const BAD_REQUEST: u32 = 1001;
    pub const INTERNAL: u32 = 1002;
    pub const NOT_FOUND: u32 = 1004;
    pub const CONFLICT: u32 = 1005;
    /// Delete refused because other records still reference the object
    pub const PROTECTED: u32 = 998;
    pub const NOT_AUTHENTICATED: u32 = 40001;
    pub const INVALID_SESSION: u32 = 40002;
    pub const PERMISSION_DENIED: u32 = 40003;
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication credentials were not provided")]
    NotAuthenticated,

    #[error("Session is invalid or expired")]
    InvalidSession,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Protected: {0}")]
    Protected(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    code: u32,
    detail: String,
    #[serde(rename = "requestId")]
    request_id: String,
    timestamp: i64,
}

impl AppError {
    /// HTTP status, business code and user-visible detail
    pub fn parts(&self) -> (StatusCode, u32, String) {
        match self {
            AppError::NotAuthenticated => (
                StatusCode::UNAUTHORIZED,
                code::NOT_AUTHENTICATED,
                self.to_string(),
            ),
            AppError::InvalidSession => (
                StatusCode::UNAUTHORIZED,
                code::INVALID_SESSION,
                self.to_string(),
            ),
            AppError::PermissionDenied(_) => (
                StatusCode::FORBIDDEN,
                code::PERMISSION_DENIED,
                "You do not have permission to perform this action".to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, code::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) | AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, code::BAD_REQUEST, msg.clone())
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, code::CONFLICT, msg.clone()),
            AppError::Protected(msg) => (StatusCode::BAD_REQUEST, code::PROTECTED, msg.clone()),
            AppError::Json(err) => (StatusCode::BAD_REQUEST, code::BAD_REQUEST, err.to_string()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                internal("Internal Server Error")
            }
            AppError::Database(err) => {
                tracing::error!("Database error: {}", err);
                internal("Database Error")
            }
            AppError::Cache(err) => {
                tracing::error!("Cache error: {}", err);
                internal("Cache Error")
            }
            AppError::Config(msg) => {
                tracing::error!("Config error: {}", msg);
                internal("Configuration Error")
            }
        }
    }
}

fn internal(detail: &str) -> (StatusCode, u32, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        code::INTERNAL,
        detail.to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::PermissionDenied(reason) = &self {
            tracing::debug!("Permission denied: {}", reason);
        }
        let (status, code, detail) = self.parts();

        let body = ErrorResponse {
            code,
            detail,
            request_id: current_request_id().unwrap_or_default(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for application
pub type AppResult<T> = Result<T, AppError>;

/// Helper trait for converting Option to AppError::NotFound
pub trait OptionExt<T> {
    fn ok_or_not_found(self, msg: impl Into<String>) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, msg: impl Into<String>) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(msg.into()))
    }
}

/// Helper to convert anyhow errors to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let err = AppError::NotFound("User not found".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_business_codes() {
        assert_eq!(AppError::NotAuthenticated.parts().1, code::NOT_AUTHENTICATED);
        assert_eq!(AppError::InvalidSession.parts().1, code::INVALID_SESSION);
        let (status, biz, _) = AppError::PermissionDenied("GET /api/x".into()).parts();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(biz, code::PERMISSION_DENIED);
        assert_eq!(AppError::Protected("menu".into()).parts().1, code::PROTECTED);
    }

    #[test]
    fn test_permission_denied_hides_reason() {
        let (_, _, detail) = AppError::PermissionDenied("GET /api/secret".into()).parts();
        assert!(!detail.contains("/api/secret"));
    }

    #[test]
    fn test_option_ext() {
        let opt: Option<i32> = None;
        let result = opt.ok_or_not_found("Item not found");
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
