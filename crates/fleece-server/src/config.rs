//! Server configuration

use fleece_core::loader::LoaderConfig;
use fleece_core::{CacheConfig, CacheKey, ConfigError, DefaultModel};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{ServerError, ServerResult};

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server binding address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Worker identity reported in responses and metric labels; the process id when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<u32>,

    /// Device index handed to the loader; -1 is CPU
    #[serde(default = "default_device")]
    pub device: i32,

    /// Load the default model before accepting traffic
    #[serde(default = "default_true")]
    pub preload_default: bool,

    /// Model probed by readiness and preloaded at startup; `false` disables it
    #[serde(default = "default_model", with = "default_model_setting")]
    pub default_model: Option<DefaultModel>,

    /// Model handle cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Backend that constructs handles
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Request limits
    #[serde(default)]
    pub limits: RequestLimits,
}

/// Request size and time limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestLimits {
    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Budget for one handle invocation in milliseconds; unbounded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_timeout_ms: Option<u64>,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_device() -> i32 {
    -1
}

fn default_model() -> Option<DefaultModel> {
    Some(DefaultModel::default())
}

/// `default_model` is either a `{ model_name, task }` table or a boolean
mod default_model_setting {
    use fleece_core::DefaultModel;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Setting {
        Model(DefaultModel),
        Enabled(bool),
    }

    pub fn serialize<S: Serializer>(value: &Option<DefaultModel>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(model) => model.serialize(serializer),
            None => serializer.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DefaultModel>, D::Error> {
        Ok(match Setting::deserialize(deserializer)? {
            Setting::Model(model) => Some(model),
            Setting::Enabled(true) => Some(DefaultModel::default()),
            Setting::Enabled(false) => None,
        })
    }
}

fn default_true() -> bool {
    true
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_request_timeout() -> u64 {
    300 // 5 minutes
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            worker_id: None,
            cache: CacheConfig::default(),
            device: default_device(),
            default_model: default_model(),
            preload_default: true,
            loader: LoaderConfig::default(),
            limits: RequestLimits::default(),
        }
    }
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            request_timeout: default_request_timeout(),
            invoke_timeout_ms: None,
        }
    }
}

impl RequestLimits {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn invoke_timeout(&self) -> Option<Duration> {
        self.invoke_timeout_ms.map(Duration::from_millis)
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file, with `FLEECE_` environment overrides
    /// (nested keys separated by `__`, e.g. `FLEECE_CACHE__CAPACITY=20`).
    pub fn from_file(path: &Path) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("FLEECE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Save configuration to file
    pub fn to_file(&self, path: &Path) -> ServerResult<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ServerError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Check every section for values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        if let Some(model) = &self.default_model {
            model.validate()?;
        }
        self.loader.validate()?;

        if self.limits.request_timeout == 0 {
            return Err(ConfigError::InvalidTimeout("limits.request_timeout"));
        }
        if self.limits.invoke_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidTimeout("limits.invoke_timeout_ms"));
        }
        Ok(())
    }

    /// Cache key of the default model on the configured device
    pub fn default_key(&self) -> Option<CacheKey> {
        self.default_model.as_ref().map(|model| model.key(self.device))
    }

    /// Human-readable device name
    pub fn device_name(&self) -> String {
        if self.device < 0 {
            "CPU".to_string()
        } else {
            format!("GPU:{}", self.device)
        }
    }
}
