//! Error types for the application

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::models::WorkflowStatus;

/// Errors produced by the collaboration engine.
///
/// These are reported to the sender only and never change session state.
/// Lock contention is not an error: see `LockOutcome` and `release_lock`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollabError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type CollabResult<T> = std::result::Result<T, CollabError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Collab(#[from] CollabError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Collab(e) => match e {
                CollabError::Protocol(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                CollabError::Unauthorized(_) => (StatusCode::FORBIDDEN, e.to_string()),
                CollabError::NotFound(_) | CollabError::BlockNotFound(_) => {
                    (StatusCode::NOT_FOUND, e.to_string())
                }
                CollabError::InvalidTransition { .. } => (StatusCode::CONFLICT, e.to_string()),
                CollabError::Persistence(msg) => {
                    tracing::error!("Persistence error: {}", msg);
                    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                }
            },
            AppError::NotFound(e) => (StatusCode::NOT_FOUND, e.clone()),
            AppError::BadRequest(e) => (StatusCode::BAD_REQUEST, e.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.clone())
            }
        };

        (status, message).into_response()
    }
}

impl From<AppError> for CollabError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Collab(e) => e,
            AppError::NotFound(msg) => CollabError::NotFound(msg),
            other => CollabError::Persistence(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
