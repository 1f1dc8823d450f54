//! Loader backed by an upstream HTTP inference backend
//!
//! Loading asks the backend to materialise the model
//! (`GET {base}/models/{model}?task=..&device=..`); invoking posts
//! `{"inputs": .., "parameters": ..}` to `{base}/models/{model}/{task}`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::CacheKey;
use crate::error::{ConfigError, InvocationError, LoadError};
use crate::handle::{Handle, HandleLoader, InferenceHandle, Inputs, Options};

/// Loader producing [`RemoteHandle`]s
#[derive(Debug, Clone)]
pub struct RemoteLoader {
    client: Client,
    base_url: Url,
}

impl RemoteLoader {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ConfigError::InvalidLoader(format!("base_url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidLoader(format!("base_url '{base_url}' cannot hold a path")));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidLoader(format!("http client: {e}")))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Option<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().ok()?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Some(url)
    }
}

#[async_trait]
impl HandleLoader for RemoteLoader {
    async fn load(&self, key: &CacheKey) -> Result<Handle, LoadError> {
        let url = self
            .endpoint(&["models", key.model_name()])
            .ok_or_else(|| LoadError::new(key, format!("base URL {} cannot hold a path", self.base_url)))?;

        let device = key.device().to_string();
        let response = self
            .client
            .get(url)
            .query(&[("task", key.task()), ("device", device.as_str())])
            .send()
            .await
            .map_err(|e| LoadError::new(key, format!("backend unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoadError::new(key, format!("backend answered {status}: {body}")));
        }

        let invoke_url = self
            .endpoint(&["models", key.model_name(), key.task()])
            .ok_or_else(|| LoadError::new(key, "cannot build invocation URL"))?;

        debug!(model = %key.model_name(), task = %key.task(), url = %invoke_url, "Remote pipeline ready");
        Ok(Arc::new(RemoteHandle {
            client: self.client.clone(),
            invoke_url,
        }))
    }
}

/// Handle bound to one (model, task) endpoint of the backend
#[derive(Debug, Clone)]
pub struct RemoteHandle {
    client: Client,
    invoke_url: Url,
}

#[async_trait]
impl InferenceHandle for RemoteHandle {
    async fn invoke(&self, inputs: &Inputs, options: &Options) -> Result<Value, InvocationError> {
        let response = self
            .client
            .post(self.invoke_url.clone())
            .json(&json!({ "inputs": inputs, "parameters": options }))
            .send()
            .await
            .map_err(|e| InvocationError::Runtime(format!("backend request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    InvocationError::InvalidOptions(body)
                }
                StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNSUPPORTED_MEDIA_TYPE => {
                    InvocationError::UnsupportedInput(body)
                }
                _ => InvocationError::Runtime(format!("backend answered {status}: {body}")),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| InvocationError::Runtime(format!("malformed backend response: {e}")))
    }
}
