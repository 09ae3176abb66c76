//! HTTP error types for the iacforge server.
//!
//! Maps domain errors from `iacforge-core` into HTTP responses. Every error
//! variant produces a JSON body with a machine-readable `error` field and a
//! human-readable `message`.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use iacforge_core::error::{ArtifactError, CredentialError, EngineError, ErrorCategory, JobError};

/// Seconds a client is told to wait after a capacity rejection.
const RETRY_AFTER_SECS: u64 = 5;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input; `code` is the machine-readable error.
    BadRequest { code: &'static str, message: String },
    /// The operation conflicts with the resource's state.
    Conflict(String),
    /// The job queue is full.
    TooManyRequests(String),
    /// An external dependency failed.
    BadGateway(String),
    /// The server is shutting down.
    Unavailable(String),
    /// Internal server error.
    Internal(String),
}

impl AppError {
    /// A `400` with the generic `bad_request` code.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: "bad_request",
            message: message.into(),
        }
    }
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "already_terminal", msg),
            Self::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, "capacity", msg),
            Self::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "upstream", msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}

fn category_code(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Input => "input",
        ErrorCategory::Upstream => "upstream",
        ErrorCategory::Credential => "invalid_credential",
        ErrorCategory::Capacity => "capacity",
        ErrorCategory::Timeout => "timeout",
        ErrorCategory::Cancelled => "cancelled",
        ErrorCategory::Internal => "internal_error",
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err.category() {
            ErrorCategory::Upstream | ErrorCategory::Timeout => Self::BadGateway(err.to_string()),
            ErrorCategory::Internal => Self::Internal(err.to_string()),
            category => Self::BadRequest {
                code: category_code(category),
                message: err.to_string(),
            },
        }
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound { .. } => Self::NotFound(err.to_string()),
            JobError::AlreadyTerminal { .. } => Self::Conflict(err.to_string()),
            JobError::Capacity { .. } => Self::TooManyRequests(err.to_string()),
            JobError::Rejected(inner) => inner.into(),
            JobError::ShuttingDown => Self::Unavailable(err.to_string()),
            JobError::InvalidTransition { .. }
            | JobError::Serialization { .. }
            | JobError::Storage(_) => Self::Internal(err.to_string()),
            JobError::Artifact(inner) => inner.into(),
        }
    }
}

impl From<ArtifactError> for AppError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound { .. } => Self::NotFound(err.to_string()),
            ArtifactError::InvalidId { .. } | ArtifactError::Empty => {
                Self::bad_request(err.to_string())
            }
            ArtifactError::Serialization { .. } | ArtifactError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotFound => Self::NotFound(err.to_string()),
            CredentialError::BadFormat { .. }
            | CredentialError::Rejected { .. }
            | CredentialError::Expired
            | CredentialError::InsufficientPermission { .. }
            | CredentialError::UnsupportedProvider { .. }
            | CredentialError::PersistenceUnavailable => Self::BadRequest {
                code: "invalid_credential",
                message: err.to_string(),
            },
            CredentialError::Upstream { .. } => Self::BadGateway(err.to_string()),
            CredentialError::Barrier(_) => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_sets_retry_after() {
        let response = AppError::from(JobError::Capacity { capacity: 4 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from(RETRY_AFTER_SECS))
        );
    }

    #[test]
    fn rejected_submissions_carry_their_category() {
        let err = AppError::from(JobError::Rejected(EngineError::Credential(
            CredentialError::Expired,
        )));
        assert!(matches!(
            err,
            AppError::BadRequest {
                code: "invalid_credential",
                ..
            }
        ));
        let err = AppError::from(JobError::Rejected(EngineError::Input {
            reason: "empty".to_owned(),
        }));
        assert!(matches!(err, AppError::BadRequest { code: "input", .. }));
    }

    #[test]
    fn terminal_cancel_is_a_conflict() {
        let response = AppError::from(JobError::AlreadyTerminal {
            job_id: "job_1".to_owned(),
            status: "succeeded".to_owned(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
