//! In-process loader whose handles echo their inputs

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::CacheKey;
use crate::error::{InvocationError, LoadError};
use crate::handle::{Handle, HandleLoader, InferenceHandle, Inputs, Options};

/// Loader producing [`EchoHandle`]s
#[derive(Debug, Default)]
pub struct EchoLoader {
    allowed_models: Option<HashSet<String>>,
    load_delay: Duration,
    loads: AtomicU64,
}

impl EchoLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict loadable model names; anything else fails to load
    pub fn with_allowed_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    /// Simulate an expensive construction
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Number of loads performed so far
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HandleLoader for EchoLoader {
    async fn load(&self, key: &CacheKey) -> Result<Handle, LoadError> {
        self.loads.fetch_add(1, Ordering::Relaxed);

        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }

        if let Some(allowed) = &self.allowed_models {
            if !allowed.contains(key.model_name()) {
                return Err(LoadError::new(
                    key,
                    format!("'{}' is not a known model identifier", key.model_name()),
                ));
            }
        }

        debug!(model = %key.model_name(), task = %key.task(), "Constructed echo handle");
        Ok(Arc::new(EchoHandle {
            model_name: key.model_name().to_string(),
            task: key.task().to_string(),
        }))
    }
}

/// Handle that returns one prediction object per input item.
///
/// Accepts the `max_length` option (positive integer, truncates the echoed
/// text in characters); any other option is rejected.
#[derive(Debug, Clone)]
pub struct EchoHandle {
    model_name: String,
    task: String,
}

impl EchoHandle {
    fn max_length(options: &Options) -> Result<Option<usize>, InvocationError> {
        let mut max_length = None;
        for (name, value) in options {
            match name.as_str() {
                "max_length" => {
                    let parsed = value
                        .as_u64()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| {
                            InvocationError::InvalidOptions(format!(
                                "max_length must be a positive integer, got {value}"
                            ))
                        })?;
                    max_length = Some(parsed as usize);
                }
                other => {
                    return Err(InvocationError::InvalidOptions(format!(
                        "unexpected keyword argument '{other}'"
                    )))
                }
            }
        }
        Ok(max_length)
    }

    fn predict(&self, item: &str, max_length: Option<usize>) -> Value {
        let text: String = match max_length {
            Some(limit) => item.chars().take(limit).collect(),
            None => item.to_string(),
        };
        json!({
            "model": self.model_name,
            "task": self.task,
            "text": text,
        })
    }
}

#[async_trait]
impl InferenceHandle for EchoHandle {
    async fn invoke(&self, inputs: &Inputs, options: &Options) -> Result<Value, InvocationError> {
        let max_length = Self::max_length(options)?;
        match inputs {
            Inputs::Single(item) => Ok(self.predict(item, max_length)),
            Inputs::Batch(items) => Ok(Value::Array(
                items.iter().map(|item| self.predict(item, max_length)).collect(),
            )),
        }
    }
}
