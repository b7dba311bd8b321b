// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden (e.g., someone else's attempt)
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., duplicate username)
    Conflict(String),

    /// The attempt is still running; its results may not be shown yet.
    /// Rendered as a redirect to the live-attempt view.
    AttemptInProgress(Uuid),

    /// The attempt is closed; it can no longer be taken or answered.
    /// Rendered as a redirect to the results view.
    AttemptCompleted(Uuid),
}

impl AppError {
    /// Whether repeating the same operation later might succeed.
    /// Only storage/network failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::InternalServerError(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code,
/// or into a `303 See Other` for the attempt navigation outcomes.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::AttemptInProgress(id) => {
                return Redirect::to(&format!("/api/attempts/{}", id)).into_response();
            }
            AppError::AttemptCompleted(id) => {
                return Redirect::to(&format!("/api/attempts/{}/results", id)).into_response();
            }
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_redirects_to_live_view() {
        let id = Uuid::new_v4();
        let resp = AppError::AttemptInProgress(id).into_response();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let location = resp.headers().get("location").unwrap().to_str().unwrap();
        assert_eq!(location, format!("/api/attempts/{}", id));
    }

    #[test]
    fn test_completed_redirects_to_results() {
        let id = Uuid::new_v4();
        let resp = AppError::AttemptCompleted(id).into_response();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let location = resp.headers().get("location").unwrap().to_str().unwrap();
        assert_eq!(location, format!("/api/attempts/{}/results", id));
    }

    #[test]
    fn test_only_internal_errors_are_retryable() {
        assert!(AppError::InternalServerError("db".into()).is_retryable());
        assert!(!AppError::BadRequest("x".into()).is_retryable());
        assert!(!AppError::AttemptCompleted(Uuid::new_v4()).is_retryable());
    }
}
