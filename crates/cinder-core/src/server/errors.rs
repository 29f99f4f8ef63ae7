//! JSON error responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::jobs::OrchestratorError;

/// Error returned by API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "missing or invalid API key")
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (status, axum::Json(json!({ "error": code, "message": message.into() }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        json_error(self.status, self.code, self.message)
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let message = err.to_string();
        match err {
            OrchestratorError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", message),
            OrchestratorError::InvalidSpec(_) => Self::new(StatusCode::BAD_REQUEST, "invalid_spec", message),
            OrchestratorError::NoResourceYet(_) => Self::new(StatusCode::CONFLICT, "no_resource_yet", message),
            OrchestratorError::ResourceReleased(_) => Self::new(StatusCode::GONE, "resource_released", message),
            OrchestratorError::Provider(_) => Self::new(StatusCode::BAD_GATEWAY, "provider_error", message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_spec", rejection.body_text())
    }
}
