//! Middleware components for the server

use crate::{config::RequestLimits, error::ServerError};
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Header carrying the per-request id
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Request timeout middleware
pub async fn timeout_middleware(
    State(limits): State<Arc<RequestLimits>>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let timeout_duration = limits.request_timeout();
    let uri = request.uri().clone();

    match tokio::time::timeout(timeout_duration, next.run(request)).await {
        Ok(response) => Ok(response),
        Err(_) => {
            warn!(uri = %uri, timeout_secs = timeout_duration.as_secs(), "Request timed out");
            Err(ServerError::Timeout(timeout_duration))
        }
    }
}

/// Logging middleware; tags every request and response with an `x-request-id`
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let request_id = match request.headers().get(&REQUEST_ID_HEADER) {
        Some(value) => value.clone(),
        None => {
            let generated = uuid::Uuid::new_v4().to_string();
            let value = HeaderValue::from_str(&generated).unwrap_or_else(|_| HeaderValue::from_static("unknown"));
            request.headers_mut().insert(REQUEST_ID_HEADER.clone(), value.clone());
            value
        }
    };
    let request_id_str = request_id.to_str().unwrap_or("invalid").to_string();

    info!(
        method = %method,
        uri = %uri,
        request_id = %request_id_str,
        "Request started"
    );

    let mut response = next.run(request).await;
    let elapsed = start.elapsed();

    info!(
        method = %method,
        uri = %uri,
        request_id = %request_id_str,
        status = %response.status(),
        elapsed_ms = %elapsed.as_millis(),
        "Request completed"
    );

    response.headers_mut().insert(REQUEST_ID_HEADER.clone(), request_id);
    response
}
