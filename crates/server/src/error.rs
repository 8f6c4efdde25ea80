//! JSON error responses

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use core_pipeline::{BookmarkError, FetchError};
use llm_bridge::{DistillError, RoutingError};
use std::time::Duration;

/// Error body: `{"error": <kind>, "message": <text>}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(kind: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, kind, message)
    }

    pub fn bookmarks_not_found() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "bookmarks_not_found",
            "no Chrome bookmarks file found; set bookmarks.path in sieve.toml",
        )
    }

    pub fn deadline_exceeded(deadline: Duration) -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            "deadline_exceeded",
            format!("request did not finish within {}s", deadline.as_secs()),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, kind = self.kind, message = %self.message, "request failed");
        } else {
            tracing::warn!(status = %self.status, kind = self.kind, message = %self.message, "request rejected");
        }
        let body = serde_json::json!({
            "error": self.kind,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("invalid_body", rejection.body_text())
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        let status = match &err {
            FetchError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
            FetchError::FetchTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            FetchError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            FetchError::FetchRefused { .. } | FetchError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<RoutingError> for ApiError {
    fn from(err: RoutingError) -> Self {
        let status = match &err {
            RoutingError::InvalidRequest(_) | RoutingError::UnknownProvider(_) => StatusCode::BAD_REQUEST,
            RoutingError::Exhausted { .. } => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<DistillError> for ApiError {
    fn from(err: DistillError) -> Self {
        match err {
            DistillError::Fetch(e) => e.into(),
            DistillError::Routing(e) => e.into(),
            DistillError::Malformed(e) => Self::new(StatusCode::BAD_GATEWAY, e.kind(), e.to_string()),
            DistillError::DeadlineExceeded(deadline) => Self::deadline_exceeded(deadline),
            DistillError::Task(message) => Self::internal(message),
        }
    }
}

impl From<BookmarkError> for ApiError {
    fn from(err: BookmarkError) -> Self {
        match &err {
            BookmarkError::Read { .. } => Self::new(StatusCode::NOT_FOUND, "bookmarks_unreadable", err.to_string()),
            BookmarkError::Parse(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "bookmarks_malformed",
                err.to_string(),
            ),
        }
    }
}
