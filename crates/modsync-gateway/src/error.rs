//! API error types and responses.
//!
//! Create and update failures are returned with their message so callers
//! can fix the request. Every other failure is reported by status and kind
//! only; the detail goes to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use modsync_control::ControlError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid path or query parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A failure whose message is returned to the caller.
    #[error("{message}")]
    Detailed {
        /// Response status.
        status: StatusCode,
        /// Error category.
        kind: &'static str,
        /// Caller-facing message.
        message: String,
    },

    /// A failure reported without detail.
    #[error("{kind}")]
    Opaque {
        /// Response status.
        status: StatusCode,
        /// Error category.
        kind: &'static str,
    },
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// Error details.
#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

impl ApiError {
    /// Wrap a control error, keeping its message.
    #[must_use]
    pub fn detailed(err: &ControlError) -> Self {
        log(err);
        Self::Detailed {
            status: status_of(err),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Wrap a control error, dropping its message.
    #[must_use]
    pub fn opaque(err: &ControlError) -> Self {
        log(err);
        Self::Opaque {
            status: status_of(err),
            kind: err.kind(),
        }
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Detailed { status, .. } | Self::Opaque { status, .. } => *status,
        }
    }

    /// Get the error kind string for this error.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Detailed { kind, .. } | Self::Opaque { kind, .. } => *kind,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Opaque { status, .. } => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_lowercase(),
            other => other.to_string(),
        }
    }
}

fn status_of(err: &ControlError) -> StatusCode {
    StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn log(err: &ControlError) {
    if err.http_status_code() >= 500 {
        tracing::error!(kind = err.kind(), error = %err, "Request failed");
    } else {
        tracing::warn!(kind = err.kind(), error = %err, "Request rejected");
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                kind: self.kind(),
                message: self.message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self::opaque(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modsync_control::{ModuleName, ResourceIdentity, VersionToken};

    fn app() -> ModuleName {
        ModuleName::new("app").unwrap()
    }

    #[test]
    fn detailed_keeps_message() {
        let err = ApiError::detailed(&ControlError::Validation("name: too long".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "validation");
        assert_eq!(err.message(), "validation failed: name: too long");
    }

    #[test]
    fn opaque_hides_message() {
        let identity = ResourceIdentity::new("v1", "Service", "default", "secret-name");
        let err = ApiError::from(ControlError::NotOwned {
            module: app(),
            identity,
        });

        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.kind(), "not_owned");
        assert_eq!(err.message(), "forbidden");
        assert!(!err.message().contains("secret-name"));
    }

    #[test]
    fn conflict_status() {
        let err = ApiError::detailed(&ControlError::Conflict {
            name: app(),
            expected: VersionToken::from_string("a"),
            current: VersionToken::from_string("b"),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn internal_errors_are_500() {
        let err = ApiError::from(ControlError::Internal("boom".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "internal server error");
    }

    #[test]
    fn bad_request() {
        let err = ApiError::BadRequest("invalid module name".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "bad_request");
    }
}
