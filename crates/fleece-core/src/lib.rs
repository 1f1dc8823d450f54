//! Fleece Core - model handle caching and request orchestration
//!
//! This crate owns the pieces of the Fleece inference service that do not
//! depend on the HTTP layer: the bounded single-flight [`ModelCache`], the
//! [`HandleLoader`]/[`InferenceHandle`] seams to the inference backend, the
//! injected [`MetricsRecorder`], the request [`Orchestrator`] and the
//! readiness [`Probes`].

/// Version of the fleece-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cache;
pub mod config;
pub mod error;
pub mod handle;
pub mod loader;
pub mod metrics;
pub mod orchestrator;
pub mod probe;

// Re-export commonly used types
pub use cache::{CacheKey, CacheStats, Lookup, ModelCache, ServedFrom};
pub use config::{CacheConfig, DefaultModel};
pub use error::{ConfigError, InvocationError, LoadError, LoadFailure, Phase, RequestError};
pub use handle::{Handle, HandleLoader, InferenceHandle, Inputs, Options};
pub use metrics::{MetricsRecorder, NoopRecorder, PrometheusRecorder, RequestLabels};
pub use orchestrator::{Orchestrator, PredictionRequest, PredictionResult};
pub use probe::{Probes, Readiness};

/// Identifier of this worker process, used as the `worker_pid` metric label.
pub fn worker_pid() -> u32 {
    std::process::id()
}
