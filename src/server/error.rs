//! HTTP error type and status mapping.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::core::types::TypeError;
use crate::gate::ArbiterError;
use crate::store::StoreError;

/// Handler result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// HTTP error with a stable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    /// 400.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 404.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 409.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 500.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// 503 with a Retry-After hint.
    pub fn unavailable(message: impl Into<String>, retry_after_secs: u64) -> Self {
        let mut err = Self::new(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message);
        err.retry_after_secs = Some(retry_after_secs);
        err
    }

    /// Store could not be opened for this request.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "STORE_OPEN_FAILED",
            message,
        )
    }

    /// Store could not be released after this request.
    pub fn store_release_failed(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "STORE_RELEASE_FAILED",
            message,
        )
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }

        let body = ApiErrorBody {
            code: self.code.to_string(),
            message: self.message,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound { .. } => Self::not_found(err.to_string()),
            StoreError::AlreadyExists { .. } | StoreError::InUse(_) => {
                Self::conflict(err.to_string())
            }
            StoreError::Invalid(_) => Self::bad_request(err.to_string()),
            StoreError::NotOpen => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_NOT_OPEN",
                err.to_string(),
            ),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<ArbiterError> for ApiError {
    fn from(err: ArbiterError) -> Self {
        match &err {
            ArbiterError::AcquireTimeout(timeout) => {
                Self::unavailable(err.to_string(), timeout.as_secs().max(1))
            }
            ArbiterError::Stopped => Self::unavailable(err.to_string(), 1),
            ArbiterError::StoreOpenFailed(_) => Self::store_unavailable(err.to_string()),
            _ => Self::store_release_failed(err.to_string()),
        }
    }
}

impl From<TypeError> for ApiError {
    fn from(err: TypeError) -> Self {
        Self::bad_request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn store_errors_map_to_client_statuses() {
        let err: ApiError = StoreError::NotFound {
            kind: "repo",
            name: "main".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: ApiError = StoreError::InUse("published".into()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err: ApiError = StoreError::Invalid("bad".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn lifecycle_errors_are_server_errors() {
        let err: ApiError = ArbiterError::RefCountUnderflow.into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err: ApiError =
            ArbiterError::StoreOpenFailed(StoreError::Injected("open".into())).into();
        assert_eq!(err.code(), "STORE_OPEN_FAILED");
    }

    #[test]
    fn acquire_timeout_sets_retry_after() {
        let err: ApiError = ArbiterError::AcquireTimeout(Duration::from_secs(3)).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "3");
    }
}
