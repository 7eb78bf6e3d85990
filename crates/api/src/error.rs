use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use renderwatch_core::error::CoreError;
use renderwatch_worker::SubmitError;
use serde::Serialize;

/// Postgres SQLSTATE for `check_violation`.
const CHECK_VIOLATION: &str = "23514";

/// Everything a handler can fail with.
///
/// Rendered as `{"error": <message>, "code": <CODE>}`. Server-side failures
/// are logged in full and answered with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed query parameters and similar client mistakes.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<SubmitError> for AppError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Core(CoreError::Validation(e.to_string()))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl ErrorBody {
    fn new(code: &'static str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }

    fn internal() -> Self {
        Self::new("INTERNAL_ERROR", "An internal error occurred")
    }
}

impl AppError {
    fn classify(&self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Core(CoreError::NotFound { entity, id }) => (
                StatusCode::NOT_FOUND,
                ErrorBody::new("NOT_FOUND", format!("{entity} with id {id} not found")),
            ),
            AppError::Core(CoreError::Validation(msg)) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("VALIDATION_ERROR", msg.as_str()),
            ),
            AppError::Core(CoreError::Conflict(msg)) => {
                (StatusCode::CONFLICT, ErrorBody::new("CONFLICT", msg.as_str()))
            }
            AppError::Core(CoreError::Internal(msg)) => {
                tracing::error!(error = %msg, "Unhandled core error");
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::internal())
            }
            AppError::Database(err) => classify_db(err),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("BAD_REQUEST", msg.as_str()),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.classify();
        (status, Json(body)).into_response()
    }
}

/// `RowNotFound` is a 404 and a CHECK violation a 400 naming the constraint.
/// Anything else is a 500.
fn classify_db(err: &sqlx::Error) -> (StatusCode, ErrorBody) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            ErrorBody::new("NOT_FOUND", "Resource not found"),
        ),
        sqlx::Error::Database(db) if db.code().as_deref() == Some(CHECK_VIOLATION) => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new(
                "VALIDATION_ERROR",
                format!(
                    "Value violates check constraint: {}",
                    db.constraint().unwrap_or("unknown")
                ),
            ),
        ),
        other => {
            tracing::error!(error = %other, "Database error");
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::internal())
        }
    }
}
