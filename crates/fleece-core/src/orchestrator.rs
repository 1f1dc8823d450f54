//! Prediction request orchestration
//!
//! One request goes through three timed phases: obtaining the handle from the
//! cache (hit, coalesced wait, or fresh load), invoking it, and reporting.
//! Every phase timing and the final status are recorded whether or not the
//! request succeeds.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::cache::{CacheKey, ModelCache, ServedFrom};
use crate::error::{Phase, RequestError};
use crate::handle::{Inputs, Options};
use crate::metrics::{MetricsRecorder, RequestLabels};

/// Incoming prediction request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Model identifier, e.g. `distilbert-base-uncased-finetuned-sst-2-english`
    pub model_name: String,
    /// Task name, e.g. `sentiment-analysis`
    pub task: String,
    /// A single string or a list of strings for batch processing
    pub inputs: Inputs,
    /// Keyword options passed through to the pipeline call
    #[serde(default)]
    pub pipeline_kwargs: Options,
}

/// Successful prediction with telemetry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub model_name: String,
    pub task: String,
    pub predictions: Value,
    pub worker_pid: u32,
    pub served_from: ServedFrom,
    /// True unless this request performed the load itself
    pub pipeline_from_lru_cache: bool,
    pub load_wait_time_ms: f64,
    pub inference_execution_time_ms: f64,
    pub total_request_time_ms: f64,
}

/// Resolves handles through the cache and runs them
pub struct Orchestrator {
    cache: Arc<ModelCache>,
    metrics: Arc<dyn MetricsRecorder>,
    device: i32,
    worker_pid: u32,
    invoke_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(cache: Arc<ModelCache>, metrics: Arc<dyn MetricsRecorder>, device: i32) -> Self {
        Self {
            cache,
            metrics,
            device,
            worker_pid: crate::worker_pid(),
            invoke_timeout: None,
            request_timeout: None,
        }
    }

    /// Bound the invoke phase. A timed-out invocation leaves the handle cached.
    pub fn with_invoke_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    /// Bound the whole request. The request is answered and counted as a
    /// timeout; a load it was waiting on keeps running for other callers.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Report `worker_pid` instead of the process id
    pub fn with_worker_pid(mut self, worker_pid: u32) -> Self {
        self.worker_pid = worker_pid;
        self
    }

    pub fn device(&self) -> i32 {
        self.device
    }

    pub fn worker_pid(&self) -> u32 {
        self.worker_pid
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Serve one prediction request.
    ///
    /// # Errors
    /// Returns `RequestError` describing which phase failed. The error has
    /// already been counted in metrics under its HTTP status.
    pub async fn handle(&self, request: PredictionRequest) -> Result<PredictionResult, RequestError> {
        let started = Instant::now();
        let outcome = match self.request_timeout {
            Some(budget) => tokio::time::timeout(budget, self.run(&request))
                .await
                .unwrap_or(Err(RequestError::Timeout {
                    phase: Phase::Request,
                    budget,
                })),
            None => self.run(&request).await,
        };
        let total = started.elapsed();

        self.metrics
            .observe_total(&request.model_name, &request.task, total);
        let labels = RequestLabels {
            model_name: &request.model_name,
            task: &request.task,
            worker_pid: self.worker_pid,
        };
        let total_ms = round_ms(total);

        match outcome {
            Ok(mut result) => {
                self.metrics.record_request(&labels, 200);
                result.total_request_time_ms = total_ms;
                info!(
                    pid = self.worker_pid,
                    model = %request.model_name,
                    task = %request.task,
                    inference_ms = result.inference_execution_time_ms,
                    total_ms,
                    "Prediction successful"
                );
                Ok(result)
            }
            Err(err) => {
                let status = err.status_code();
                self.metrics.record_request(&labels, status);
                if status >= 500 {
                    error!(
                        pid = self.worker_pid,
                        model = %request.model_name,
                        task = %request.task,
                        status,
                        total_ms,
                        error = ?err,
                        "Prediction error"
                    );
                } else {
                    warn!(
                        pid = self.worker_pid,
                        model = %request.model_name,
                        task = %request.task,
                        status,
                        total_ms,
                        error = %err,
                        "Prediction rejected"
                    );
                }
                Err(err)
            }
        }
    }

    async fn run(&self, request: &PredictionRequest) -> Result<PredictionResult, RequestError> {
        validate(request)?;

        let key = CacheKey::new(request.model_name.clone(), request.task.clone(), self.device);

        let wait_started = Instant::now();
        let lookup = self.cache.get_or_load(&key).await;
        let wait = wait_started.elapsed();
        self.metrics
            .observe_handle_wait(&request.model_name, &request.task, wait);

        let lookup = lookup.map_err(|err| match err.timeout_budget() {
            Some(budget) => RequestError::Timeout {
                phase: Phase::Load,
                budget,
            },
            None => RequestError::Load(err),
        })?;

        info!(
            pid = self.worker_pid,
            model = %request.model_name,
            task = %request.task,
            served_from = ?lookup.served_from,
            "Processing request"
        );

        let invoke_started = Instant::now();
        let invocation = AssertUnwindSafe(lookup.handle.invoke(&request.inputs, &request.pipeline_kwargs))
            .catch_unwind();
        let invoked = match self.invoke_timeout {
            Some(budget) => tokio::time::timeout(budget, invocation).await.map_err(|_| {
                RequestError::Timeout {
                    phase: Phase::Invoke,
                    budget,
                }
            }),
            None => Ok(invocation.await),
        };
        let inference = invoke_started.elapsed();
        self.metrics
            .observe_inference(&request.model_name, &request.task, inference);

        let predictions = invoked?
            .map_err(|panic| RequestError::Internal(format!("pipeline panicked: {}", panic_message(panic.as_ref()))))?
            .map_err(|source| RequestError::Invocation {
                model_name: request.model_name.clone(),
                source,
            })?;

        Ok(PredictionResult {
            model_name: request.model_name.clone(),
            task: request.task.clone(),
            predictions,
            worker_pid: self.worker_pid,
            served_from: lookup.served_from,
            pipeline_from_lru_cache: lookup.served_from.is_cached(),
            load_wait_time_ms: round_ms(wait),
            inference_execution_time_ms: round_ms(inference),
            total_request_time_ms: 0.0,
        })
    }
}

fn validate(request: &PredictionRequest) -> Result<(), RequestError> {
    if request.model_name.trim().is_empty() {
        return Err(RequestError::InvalidRequest("model_name must not be empty".to_string()));
    }
    if request.task.trim().is_empty() {
        return Err(RequestError::InvalidRequest("task must not be empty".to_string()));
    }
    if request.inputs.is_empty() {
        return Err(RequestError::InvalidRequest("inputs must contain at least one item".to_string()));
    }
    Ok(())
}

/// Milliseconds rounded to two decimals
fn round_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100_000.0).round() / 100.0
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
