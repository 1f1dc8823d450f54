//! Service information and cache introspection

use crate::server::ServerState;
use axum::{extract::State, Json};
use fleece_core::CacheStats;
use serde::Serialize;
use serde_json::{json, Value};

/// One cached pipeline in `/cache_info`
#[derive(Debug, Serialize)]
pub struct CachedModel {
    pub model_name: String,
    pub task: String,
    pub device: i32,
    pub age_secs: f64,
    pub hits: u64,
}

/// `/cache_info` body
#[derive(Debug, Serialize)]
pub struct CacheInfo {
    pub pid: u32,
    pub hit_ratio: f64,
    pub cache_stats: CacheStats,
    /// Least recently used first
    pub cached_models: Vec<CachedModel>,
}

/// Basic API information
pub async fn root(State(state): State<ServerState>) -> Json<Value> {
    let default_model_status = match state.config.default_key() {
        None => "Not configured for preload",
        Some(key) if state.cache.contains(&key) => "Loaded and cached",
        Some(_) => "Not cached (will load on first use)",
    };

    Json(json!({
        "message": "Fleece Dynamic Inference API",
        "version": crate::VERSION,
        "active_device": state.config.device_name(),
        "default_model_status": default_model_status,
        "current_cache_size": state.cache.stats().current_size,
    }))
}

/// Cache counters and contents for this worker
pub async fn cache_info(State(state): State<ServerState>) -> Json<CacheInfo> {
    let cache_stats = state.cache.stats();
    let cached_models = state
        .cache
        .keys()
        .into_iter()
        .map(|key| CachedModel {
            age_secs: state
                .cache
                .entry_age(&key)
                .map(|age| age.as_secs_f64())
                .unwrap_or_default(),
            hits: state.cache.entry_hits(&key).unwrap_or_default(),
            model_name: key.model_name().to_string(),
            task: key.task().to_string(),
            device: key.device(),
        })
        .collect();

    Json(CacheInfo {
        pid: state.orchestrator.worker_pid(),
        hit_ratio: cache_stats.hit_ratio(),
        cache_stats,
        cached_models,
    })
}
