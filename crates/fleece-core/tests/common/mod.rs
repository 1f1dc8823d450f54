//! Test loaders and handles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fleece_core::{
    CacheConfig, CacheKey, Handle, HandleLoader, InferenceHandle, Inputs, InvocationError,
    LoadError, MetricsRecorder, ModelCache, NoopRecorder, Options,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Handle that rejects any option other than `max_length`, can be made slow
/// or made to panic through options.
pub struct ScriptedHandle {
    pub id: usize,
}

#[async_trait]
impl InferenceHandle for ScriptedHandle {
    async fn invoke(&self, inputs: &Inputs, options: &Options) -> Result<Value, InvocationError> {
        if let Some(ms) = options.get("sleep_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        } else if options.contains_key("panic") {
            panic!("scripted panic");
        } else if let Some((name, _)) = options.iter().find(|(name, _)| name.as_str() != "max_length") {
            return Err(InvocationError::InvalidOptions(format!(
                "unexpected keyword argument '{name}'"
            )));
        }
        Ok(json!({ "handle": self.id, "items": inputs.len() }))
    }
}

/// Loader that counts loads, can fail on demand and can hold loads until released.
#[derive(Default)]
pub struct TestLoader {
    pub loads: AtomicUsize,
    pub failing: AtomicBool,
    gate: Option<Semaphore>,
}

impl TestLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads block until [`TestLoader::release`] is called
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release(&self, loads: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(loads);
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HandleLoader for TestLoader {
    async fn load(&self, key: &CacheKey) -> Result<Handle, LoadError> {
        let id = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| LoadError::new(key, e.to_string()))?
                .forget();
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(LoadError::new(key, "model repository unreachable"));
        }
        Ok(Arc::new(ScriptedHandle { id }))
    }
}

pub fn cache(capacity: usize, loader: Arc<TestLoader>) -> Arc<ModelCache> {
    cache_with_metrics(capacity, loader, Arc::new(NoopRecorder))
}

pub fn cache_with_metrics(
    capacity: usize,
    loader: Arc<TestLoader>,
    metrics: Arc<dyn MetricsRecorder>,
) -> Arc<ModelCache> {
    let config = CacheConfig {
        capacity,
        ..CacheConfig::default()
    };
    Arc::new(ModelCache::new(&config, loader, metrics).expect("valid cache config"))
}

pub fn key(model: &str) -> CacheKey {
    CacheKey::new(model, "t", 0)
}

/// Let every spawned task on a current-thread runtime run until it blocks
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
