//! Prometheus scrape endpoint

use crate::server::ServerState;
use axum::{extract::State, http::header, response::IntoResponse};
use fleece_core::metrics::render_cache_stats;

/// Prometheus text exposition format, version 0.0.4
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Request series from the recorder followed by cache counters
pub async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    let mut body = state.metrics.render();
    body.push_str(&render_cache_stats(
        &state.cache.stats(),
        state.orchestrator.worker_pid(),
    ));

    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body)
}
