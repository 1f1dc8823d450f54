//! Liveness and readiness probes

use std::sync::Arc;
use tracing::warn;

use crate::cache::{CacheKey, ModelCache, ServedFrom};
use crate::error::LoadError;

/// Outcome of a readiness probe
#[derive(Debug, Clone)]
pub enum Readiness {
    /// The default model is cached or loadable
    Ready { message: String },
    /// The default model could not be loaded; retry later
    NotReady { error: LoadError },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Health probes backed by the model cache
pub struct Probes {
    cache: Arc<ModelCache>,
    default_key: Option<CacheKey>,
}

impl Probes {
    pub fn new(cache: Arc<ModelCache>, default_key: Option<CacheKey>) -> Self {
        Self { cache, default_key }
    }

    pub fn default_key(&self) -> Option<&CacheKey> {
        self.default_key.as_ref()
    }

    /// Liveness: the process is up and answering
    pub fn healthy(&self) -> bool {
        true
    }

    /// Readiness: the default model can be obtained from the cache.
    ///
    /// A load failure is reported, never raised; a later probe retries the load.
    pub async fn ready(&self) -> Readiness {
        let Some(key) = &self.default_key else {
            return Readiness::Ready {
                message: "API is operational (no default model specified for preload).".to_string(),
            };
        };

        match self.cache.get_or_load(key).await {
            Ok(lookup) => {
                let how = match lookup.served_from {
                    ServedFrom::Loaded => "loaded",
                    ServedFrom::Hit | ServedFrom::Coalesced => "cached",
                };
                Readiness::Ready {
                    message: format!("Default model '{}' accessible ({how}).", key.model_name()),
                }
            }
            Err(error) => {
                warn!(model = %key.model_name(), error = %error, "Readiness check failed");
                Readiness::NotReady { error }
            }
        }
    }
}
