//! Health check handlers

use crate::{
    error::{ServerError, ServerResult},
    server::ServerState,
};
use axum::{extract::State, Json};
use fleece_core::Readiness;
use serde_json::{json, Value};

/// Liveness: answers as long as the process serves HTTP
pub async fn healthz(State(state): State<ServerState>) -> Json<Value> {
    let status = if state.probes.healthy() { "ok" } else { "unhealthy" };
    Json(json!({
        "status": status,
        "pid": state.orchestrator.worker_pid(),
    }))
}

/// Readiness: the default model is cached or loadable.
///
/// Returns 503 while the default model cannot be loaded; every probe retries.
pub async fn readiness(State(state): State<ServerState>) -> ServerResult<Json<Value>> {
    match state.probes.ready().await {
        Readiness::Ready { message } => Ok(Json(json!({
            "status": "ready",
            "message": message,
            "pid": state.orchestrator.worker_pid(),
        }))),
        Readiness::NotReady { error } => Err(ServerError::NotReady(error)),
    }
}
