use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Admission-level and operational errors raised by the throttling core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThrottleError {
    #[error("Transaction queue is full. Please try again later.")]
    QueueFull,

    #[error("Queue cleared")]
    QueueCleared,

    #[error("Throttler has been stopped")]
    Stopped,

    /// The unit of work panicked or was dropped before settling its outcome.
    #[error("Transaction was abandoned before completing")]
    Abandoned,

    #[error("Invalid throttling configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ThrottleError {
    /// Backpressure signals the caller may retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ThrottleError::QueueFull | ThrottleError::QueueCleared)
    }
}

/// Outcome error of [`crate::Throttler::submit`].
///
/// `Failed` carries the unit of work's own error untouched.
#[derive(Debug, Error)]
pub enum SubmitError<E> {
    #[error(transparent)]
    Rejected(#[from] ThrottleError),

    #[error("{0}")]
    Failed(E),
}

impl<E> SubmitError<E> {
    pub fn rejection(&self) -> Option<&ThrottleError> {
        match self {
            SubmitError::Rejected(err) => Some(err),
            SubmitError::Failed(_) => None,
        }
    }

    pub fn into_failure(self) -> Option<E> {
        match self {
            SubmitError::Failed(err) => Some(err),
            SubmitError::Rejected(_) => None,
        }
    }
}

pub type ThrottleResult<T> = Result<T, ThrottleError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_throttle_error(err: &ThrottleError) -> Self {
        let message = err.to_string();
        match err {
            ThrottleError::QueueFull => Self::new("too_many_requests", &message, 429),
            ThrottleError::QueueCleared | ThrottleError::Stopped => {
                Self::new("service_unavailable", &message, 503)
            }
            ThrottleError::InvalidConfig(_) => Self::new("bad_request", &message, 400),
            ThrottleError::Validation(_) => Self::new("validation_error", &message, 422),
            ThrottleError::Abandoned | ThrottleError::Internal(_) => {
                Self::new("internal_error", &message, 500)
            }
        }
    }
}

impl IntoResponse for ThrottleError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_throttle_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}
