use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::error::CoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::DatabaseError(msg) => {
                error!(error = %msg, "Database error while handling request.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Database error: {msg}"),
                )
            }
            AppError::InternalServerError(msg) => {
                error!(error = %msg, "Internal error while handling request.");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            CoreError::ConflictViolation(msg) => AppError::Conflict(msg),
            busy @ CoreError::Busy { .. } => AppError::Conflict(busy.to_string()),
            CoreError::InvalidInput(msg) => AppError::InvalidInput(msg),
            CoreError::Database(e) => AppError::DatabaseError(e.to_string()),
            CoreError::Credential(e) => AppError::InternalServerError(e.to_string()),
            CoreError::Task(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        CoreError::from(err).into()
    }
}
