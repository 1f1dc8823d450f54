//! Seams to the inference backend: handle construction and invocation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::cache::CacheKey;
use crate::error::{InvocationError, LoadError};

/// Keyword options passed through to the handle untouched
pub type Options = serde_json::Map<String, Value>;

/// Request inputs: one item or an ordered batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Inputs {
    Batch(Vec<String>),
    Single(String),
}

impl Inputs {
    /// Number of items
    pub fn len(&self) -> usize {
        match self {
            Inputs::Batch(items) => items.len(),
            Inputs::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Inputs::Batch(_))
    }

    /// Items in request order
    pub fn items(&self) -> Vec<&str> {
        match self {
            Inputs::Batch(items) => items.iter().map(String::as_str).collect(),
            Inputs::Single(item) => vec![item.as_str()],
        }
    }
}

impl From<&str> for Inputs {
    fn from(item: &str) -> Self {
        Inputs::Single(item.to_string())
    }
}

impl From<Vec<String>> for Inputs {
    fn from(items: Vec<String>) -> Self {
        Inputs::Batch(items)
    }
}

/// A constructed, ready-to-invoke inference engine.
///
/// Implementations must tolerate concurrent `invoke` calls on the same instance.
#[async_trait]
pub trait InferenceHandle: Send + Sync {
    /// Run the engine against `inputs`
    async fn invoke(&self, inputs: &Inputs, options: &Options) -> Result<Value, InvocationError>;
}

/// Shared reference to a loaded engine. The cache and every in-flight
/// invocation hold their own clone.
pub type Handle = Arc<dyn InferenceHandle>;

/// Expensive construction of inference handles.
///
/// Called at most once at a time per key by [`crate::ModelCache`]; must be
/// safe to call concurrently for distinct keys.
#[async_trait]
pub trait HandleLoader: Send + Sync {
    async fn load(&self, key: &CacheKey) -> Result<Handle, LoadError>;
}
