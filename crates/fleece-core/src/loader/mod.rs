//! Shipped [`HandleLoader`] implementations

pub mod echo;
pub mod remote;

pub use echo::{EchoHandle, EchoLoader};
pub use remote::{RemoteHandle, RemoteLoader};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::handle::HandleLoader;

/// Which loader backs the cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LoaderConfig {
    /// In-process handles that echo their inputs
    Echo {
        /// Only these model names load; everything loads when unset
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allowed_models: Option<Vec<String>>,
        /// Simulated construction latency
        #[serde(default)]
        load_delay_ms: u64,
    },
    /// Upstream inference backend over HTTP
    Remote {
        base_url: String,
        /// Per-call HTTP timeout in seconds
        #[serde(default = "default_remote_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_remote_timeout_secs() -> u64 {
    120
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig::Echo {
            allowed_models: None,
            load_delay_ms: 0,
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            LoaderConfig::Echo { .. } => Ok(()),
            LoaderConfig::Remote {
                base_url,
                timeout_secs,
            } => {
                if *timeout_secs == 0 {
                    return Err(ConfigError::InvalidTimeout("loader.timeout_secs"));
                }
                match reqwest::Url::parse(base_url) {
                    Ok(url) if !url.cannot_be_a_base() => Ok(()),
                    Ok(_) => Err(ConfigError::InvalidLoader(format!("base_url '{base_url}' cannot hold a path"))),
                    Err(e) => Err(ConfigError::InvalidLoader(format!("base_url '{base_url}': {e}"))),
                }
            }
        }
    }

    /// Build the configured loader
    pub fn build(&self) -> Result<Arc<dyn HandleLoader>, ConfigError> {
        self.validate()?;
        match self {
            LoaderConfig::Echo {
                allowed_models,
                load_delay_ms,
            } => {
                let mut loader = EchoLoader::new().with_load_delay(Duration::from_millis(*load_delay_ms));
                if let Some(models) = allowed_models {
                    loader = loader.with_allowed_models(models.iter().cloned());
                }
                Ok(Arc::new(loader))
            }
            LoaderConfig::Remote {
                base_url,
                timeout_secs,
            } => {
                let loader = RemoteLoader::new(base_url, Duration::from_secs(*timeout_secs))?;
                Ok(Arc::new(loader))
            }
        }
    }
}
