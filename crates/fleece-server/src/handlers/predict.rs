//! Inference request handler

use crate::{error::ServerResult, server::ServerState};
use axum::{extract::rejection::JsonRejection, extract::State, Json};
use fleece_core::{PredictionRequest, PredictionResult};

/// Run one prediction through the orchestrator.
///
/// Body: `{"model_name", "task", "inputs": str | [str], "pipeline_kwargs"?}`.
pub async fn predict(
    State(state): State<ServerState>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> ServerResult<Json<PredictionResult>> {
    let Json(request) = payload?;
    let result = state.orchestrator.handle(request).await?;
    Ok(Json(result))
}
