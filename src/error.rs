use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::room::TransitionError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Requested room or invite is absent or expired.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation is not legal in the entity's current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// A version race was lost and internal retries were exhausted; the
    /// caller should re-read and retry.
    #[error("concurrent modification, please retry")]
    ConcurrentModification,
    /// The room roster already holds the configured maximum.
    #[error("room is full")]
    CapacityExceeded,
    /// A pending invite already exists for this room and user.
    #[error("user already has a pending invite for this room")]
    AlreadyInvited,
    /// The invite outlived its expiry before a response arrived.
    #[error("invite has expired")]
    InviteExpired,
    /// The invite already left the pending state.
    #[error("invite is already resolved")]
    InviteAlreadyResolved,
    /// Acting user is not allowed to perform this operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable { .. } => ServiceError::Unavailable(err),
            StorageError::Conflict(_) | StorageError::AlreadyExists(_) => {
                ServiceError::ConcurrentModification
            }
        }
    }
}

impl From<TransitionError> for ServiceError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::CapacityExceeded { .. } => ServiceError::CapacityExceeded,
            other => ServiceError::InvalidTransition(other.to_string()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            // Absent-or-expired reads the same to the caller.
            ServiceError::InviteExpired => AppError::NotFound("invite has expired".into()),
            ServiceError::InvalidTransition(message) => AppError::Conflict(message),
            ServiceError::ConcurrentModification => {
                AppError::Conflict("concurrent modification, please retry".into())
            }
            ServiceError::CapacityExceeded => AppError::Conflict("room is full".into()),
            ServiceError::AlreadyInvited => {
                AppError::Conflict("user already has a pending invite for this room".into())
            }
            ServiceError::InviteAlreadyResolved => {
                AppError::Conflict("invite is already resolved".into())
            }
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
