//! Configuration for the handle cache and the default model

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::CacheKey;
use crate::error::ConfigError;

/// Configuration for the model handle cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of handles to keep loaded (default: 10).
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Budget for a single handle load in milliseconds; unbounded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_timeout_ms: Option<u64>,
}

fn default_capacity() -> usize {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            load_timeout_ms: None,
        }
    }
}

impl CacheConfig {
    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }

        if self.load_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidTimeout("cache.load_timeout_ms"));
        }

        Ok(())
    }

    /// Get the load timeout as a Duration.
    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_ms.map(Duration::from_millis)
    }
}

/// Model probed by readiness checks and preloaded at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultModel {
    pub model_name: String,
    pub task: String,
}

impl Default for DefaultModel {
    fn default() -> Self {
        Self {
            model_name: "distilbert-base-uncased-finetuned-sst-2-english".to_string(),
            task: "sentiment-analysis".to_string(),
        }
    }
}

impl DefaultModel {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::InvalidDefaultModel("model_name is empty".to_string()));
        }
        if self.task.trim().is_empty() {
            return Err(ConfigError::InvalidDefaultModel("task is empty".to_string()));
        }
        Ok(())
    }

    /// Cache key for this model on `device`
    pub fn key(&self, device: i32) -> CacheKey {
        CacheKey::new(self.model_name.clone(), self.task.clone(), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity, 10);
        assert!(config.load_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_config_validation_invalid_capacity() {
        let config = CacheConfig {
            capacity: 0,
            load_timeout_ms: None,
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidCapacity));
    }

    #[test]
    fn test_cache_config_validation_zero_timeout() {
        let config = CacheConfig {
            capacity: 1,
            load_timeout_ms: Some(0),
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout(_))));
    }

    #[test]
    fn test_cache_config_deserialize_partial() {
        let config: CacheConfig = serde_json::from_str(r#"{"load_timeout_ms": 1500}"#).unwrap();
        assert_eq!(config.capacity, 10);
        assert_eq!(config.load_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_default_model_key() {
        let model = DefaultModel::default();
        assert!(model.validate().is_ok());
        let key = model.key(-1);
        assert_eq!(key.task(), "sentiment-analysis");
        assert_eq!(key.device(), -1);
    }

    #[test]
    fn test_default_model_rejects_blank_fields() {
        let model = DefaultModel {
            model_name: " ".to_string(),
            task: "t".to_string(),
        };
        assert!(model.validate().is_err());
    }
}
