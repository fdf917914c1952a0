//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::batch::{LaunchRejected, RepositoryError};

/// Errors returned by HTTP handlers
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(e) => AppError::Database(e),
            RepositoryError::NotFound(id) => AppError::NotFound(format!("job execution {id}")),
            other @ RepositoryError::StaleStatus { .. } => AppError::Conflict(other.to_string()),
            other @ RepositoryError::Corrupt { .. } => AppError::Internal(other.to_string()),
        }
    }
}

impl From<LaunchRejected> for AppError {
    fn from(err: LaunchRejected) -> Self {
        match err {
            LaunchRejected::Repository(e) => e.into(),
            LaunchRejected::InvalidInput { .. } => AppError::BadRequest(err.to_string()),
            LaunchRejected::Duplicate { .. } | LaunchRejected::NotRestartable { .. } => {
                AppError::Conflict(err.to_string())
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A database error occurred".to_string())
            },
            AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Conflict(ref message) => (StatusCode::CONFLICT, message.clone()),
            AppError::Unavailable(ref message) => {
                tracing::warn!("Service unavailable: {}", message);
                (StatusCode::SERVICE_UNAVAILABLE, message.clone())
            },
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::JobStatus;
    use uuid::Uuid;

    #[test]
    fn test_duplicate_launch_maps_to_conflict() {
        let err: AppError = LaunchRejected::Duplicate {
            job_key: "/in/data.csv".to_string(),
            execution_id: Uuid::new_v4(),
            status: JobStatus::Completed,
        }
        .into();

        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_missing_execution_maps_to_not_found() {
        let err: AppError = RepositoryError::NotFound(Uuid::new_v4()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
