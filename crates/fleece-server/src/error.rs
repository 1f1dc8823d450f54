//! Error types for the Fleece server

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleece_core::{ConfigError, LoadError, RequestError};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Service not fully ready. Default model issue: {0}")]
    NotReady(LoadError),

    #[error("Invalid request body: {0}")]
    Body(#[from] JsonRejection),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        ServerError::Config(err.to_string())
    }
}

impl ServerError {
    /// HTTP status returned to the client
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Request(err) => {
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ServerError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Body(rejection) => rejection.status(),
            ServerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Config(_) | ServerError::Io(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn describe(&self) -> (&'static str, &'static str, Value) {
        match self {
            ServerError::Request(err) => Self::describe_request_error(err),
            ServerError::NotReady(err) => (
                "service_not_ready",
                "The default model could not be loaded; retry the probe later",
                json!({
                    "error_code": err.code(),
                    "model_name": err.model_name,
                    "task": err.task,
                }),
            ),
            ServerError::Body(rejection) => (
                "invalid_request",
                "Send a JSON body with model_name, task and inputs",
                json!({ "message": rejection.body_text() }),
            ),
            ServerError::Timeout(budget) => (
                "request_timeout",
                "Retry later or raise limits.request_timeout",
                json!({ "budget_ms": budget.as_millis() as u64 }),
            ),
            ServerError::Config(msg) => (
                "configuration_error",
                "Contact system administrator - server configuration issue",
                json!({ "component": "server_config", "message": msg }),
            ),
            ServerError::Io(err) => (
                "io_error",
                "Check file system permissions and disk space",
                json!({ "message": err.to_string() }),
            ),
            ServerError::Internal(msg) => (
                "internal_server_error",
                "Contact support if this error persists",
                json!({ "message": msg }),
            ),
        }
    }

    fn describe_request_error(err: &RequestError) -> (&'static str, &'static str, Value) {
        let code = err.code();
        let retryable = err.is_retryable();
        match err {
            RequestError::InvalidRequest(_) => (
                "invalid_request",
                "Check the request format and required parameters",
                json!({ "error_code": code, "retryable": retryable }),
            ),
            RequestError::Load(load) => (
                "model_load_failed",
                "Check the model name and task, and that the model backend is reachable",
                json!({
                    "error_code": code,
                    "model_name": load.model_name,
                    "task": load.task,
                    "retryable": retryable,
                }),
            ),
            RequestError::Invocation { model_name, .. } => (
                "inference_failed",
                "Check pipeline_kwargs and inputs for this model and task",
                json!({ "error_code": code, "model_name": model_name, "retryable": retryable }),
            ),
            RequestError::Timeout { phase, budget } => (
                "timeout",
                "Retry the request; the model stays cached",
                json!({
                    "error_code": code,
                    "phase": phase,
                    "budget_ms": budget.as_millis() as u64,
                    "retryable": retryable,
                }),
            ),
            RequestError::Internal(_) => (
                "internal_server_error",
                "Contact support if this error persists",
                json!({ "error_code": code, "retryable": retryable }),
            ),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error_type, suggestion, details) = self.describe();
        let message = self.to_string();

        let body = json!({
            "detail": message,
            "error": {
                "type": error_type,
                "message": message,
                "code": status.as_u16(),
                "suggestion": suggestion,
                "timestamp": chrono::Utc::now().timestamp(),
                "request_id": generate_request_id(),
                "details": details,
            }
        });

        (status, Json(body)).into_response()
    }
}

/// Generate a unique request ID for error tracking
fn generate_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}
