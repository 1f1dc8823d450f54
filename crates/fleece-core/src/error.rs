//! Error taxonomy for loading, invoking and orchestrating inference handles

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheKey;

/// Why a handle could not be constructed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    /// The loader itself reported a failure (unknown model, bad task, exhausted resources).
    #[error("{0}")]
    Loader(String),

    /// The load exceeded the configured load budget.
    #[error("load timed out after {0:?}")]
    TimedOut(Duration),

    /// The load task panicked or was cancelled before producing a result.
    #[error("load task aborted: {0}")]
    Aborted(String),
}

/// Handle construction failed for a (model, task) pair.
///
/// Cloneable because a single failure is delivered to the triggering caller
/// and to every caller that was waiting on the same in-flight load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to load pipeline for {model_name} (task: {task}): {cause}")]
pub struct LoadError {
    pub model_name: String,
    pub task: String,
    pub cause: LoadFailure,
}

impl LoadError {
    /// Loader-reported failure for `key`
    pub fn new<S: Into<String>>(key: &CacheKey, message: S) -> Self {
        Self::with_cause(key, LoadFailure::Loader(message.into()))
    }

    /// Load for `key` exceeded `budget`
    pub fn timed_out(key: &CacheKey, budget: Duration) -> Self {
        Self::with_cause(key, LoadFailure::TimedOut(budget))
    }

    /// Load task for `key` died without a result
    pub fn aborted<S: Into<String>>(key: &CacheKey, message: S) -> Self {
        Self::with_cause(key, LoadFailure::Aborted(message.into()))
    }

    fn with_cause(key: &CacheKey, cause: LoadFailure) -> Self {
        Self {
            model_name: key.model_name().to_string(),
            task: key.task().to_string(),
            cause,
        }
    }

    /// Budget that was exceeded, if this is a timeout
    pub fn timeout_budget(&self) -> Option<Duration> {
        match self.cause {
            LoadFailure::TimedOut(budget) => Some(budget),
            _ => None,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self.cause {
            LoadFailure::Loader(_) => "MODEL_LOAD_FAILED",
            LoadFailure::TimedOut(_) => "MODEL_LOAD_TIMEOUT",
            LoadFailure::Aborted(_) => "MODEL_LOAD_ABORTED",
        }
    }
}

/// A loaded handle ran but failed on the given input or options.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("runtime failure: {0}")]
    Runtime(String),
}

/// Request phase that a timeout applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Load,
    Invoke,
    /// The whole request, from lookup to response
    Request,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Load => f.write_str("load"),
            Phase::Invoke => f.write_str("invoke"),
            Phase::Request => f.write_str("request"),
        }
    }
}

/// Everything that can go wrong while serving one prediction request.
///
/// Every variant is local to the offending request; none is fatal to the process.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("An unexpected error occurred during prediction with model '{model_name}': {source}")]
    Invocation {
        model_name: String,
        #[source]
        source: InvocationError,
    },

    #[error("The {phase} phase exceeded its budget of {budget:?}")]
    Timeout { phase: Phase, budget: Duration },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RequestError {
    /// HTTP status recorded in metrics and returned to the client
    pub fn status_code(&self) -> u16 {
        match self {
            RequestError::InvalidRequest(_) | RequestError::Load(_) => 400,
            RequestError::Invocation { .. } | RequestError::Internal(_) => 500,
            RequestError::Timeout { .. } => 504,
        }
    }

    /// Whether the same request may succeed if simply retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, RequestError::Timeout { .. })
            || matches!(self, RequestError::Load(err) if matches!(err.cause, LoadFailure::Aborted(_)))
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RequestError::InvalidRequest(_) => "INVALID_REQUEST",
            RequestError::Load(err) => err.code(),
            RequestError::Invocation { .. } => "INVOCATION_FAILED",
            RequestError::Timeout { phase: Phase::Load, .. } => "LOAD_TIMEOUT",
            RequestError::Timeout { phase: Phase::Invoke, .. } => "INVOKE_TIMEOUT",
            RequestError::Timeout { phase: Phase::Request, .. } => "REQUEST_TIMEOUT",
            RequestError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid cache capacity: must be greater than 0")]
    InvalidCapacity,

    #[error("Invalid timeout for {0}: must be greater than 0")]
    InvalidTimeout(&'static str),

    #[error("Invalid default model: {0}")]
    InvalidDefaultModel(String),

    #[error("Invalid loader configuration: {0}")]
    InvalidLoader(String),
}
