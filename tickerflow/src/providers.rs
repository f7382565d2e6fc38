//! HTTP bridge to data and inference providers.
//!
//! The bridge is provider-agnostic: every data capability is a
//! `POST {endpoint}/data/{name}` with the stage arguments as the JSON body,
//! and inference is `POST {endpoint}/infer` with `{"prompt": ...}` answered
//! by `{"text": ..., "usage": {...}}`.

use crate::capabilities::{
    CapabilityRegistry, DataCapability, Generation, InferenceCapability, TokenUsage,
};
use crate::config::{ProviderConfig, TickerflowConfig};
use crate::errors::{CapabilityError, TickerflowError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Shared HTTP client plus endpoint and credentials.
#[derive(Debug, Clone)]
pub struct HttpBridge {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpBridge {
    /// Builds a bridge from provider settings. The bearer token is read from
    /// the configured environment variable when present.
    pub fn new(config: &ProviderConfig) -> Result<Self, TickerflowError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TickerflowError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty()),
            timeout: config.timeout(),
        })
    }

    /// Registers an HTTP capability for every data name used by the
    /// configured groups, plus the configured inference capability.
    pub fn registry_for(&self, config: &TickerflowConfig) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        for name in config.data_capability_names() {
            registry.register_data(Arc::new(HttpDataCapability::new(self.clone(), name)));
        }
        registry.register_inference(Arc::new(HttpInferenceCapability::new(
            self.clone(),
            config.provider.inference.clone(),
        )));
        registry
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    async fn post(&self, name: &str, path: &str, body: &impl Serialize) -> Result<Value, CapabilityError> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.map_error(name, &e))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CapabilityError::call(name, format!("HTTP {status}: {detail}")));
        }

        response.json().await.map_err(|e| self.map_error(name, &e))
    }

    fn map_error(&self, name: &str, err: &reqwest::Error) -> CapabilityError {
        if err.is_timeout() {
            CapabilityError::Timeout {
                name: name.to_string(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            CapabilityError::call(name, err.to_string())
        }
    }
}

/// A data capability served by the bridge.
#[derive(Debug, Clone)]
pub struct HttpDataCapability {
    bridge: HttpBridge,
    name: String,
}

impl HttpDataCapability {
    /// Creates a data capability named `name`.
    #[must_use]
    pub fn new(bridge: HttpBridge, name: impl Into<String>) -> Self {
        Self {
            bridge,
            name: name.into(),
        }
    }
}

#[async_trait]
impl DataCapability for HttpDataCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, args: &Value) -> Result<Value, CapabilityError> {
        debug!(capability = %self.name, "Fetching data");
        self.bridge
            .post(&self.name, &format!("data/{}", self.name), args)
            .await
    }
}

#[derive(Serialize)]
struct InferRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct InferResponse {
    text: String,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

/// An inference capability served by the bridge.
#[derive(Debug, Clone)]
pub struct HttpInferenceCapability {
    bridge: HttpBridge,
    name: String,
}

impl HttpInferenceCapability {
    /// Creates an inference capability named `name`.
    #[must_use]
    pub fn new(bridge: HttpBridge, name: impl Into<String>) -> Self {
        Self {
            bridge,
            name: name.into(),
        }
    }
}

#[async_trait]
impl InferenceCapability for HttpInferenceCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, CapabilityError> {
        debug!(capability = %self.name, prompt_len = prompt.len(), "Requesting inference");
        let body = InferRequest {
            model: &self.name,
            prompt,
        };
        let raw = self.bridge.post(&self.name, "infer", &body).await?;
        let parsed: InferResponse = serde_json::from_value(raw)
            .map_err(|e| CapabilityError::call(&self.name, format!("malformed response: {e}")))?;

        Ok(Generation {
            text: parsed.text,
            usage: parsed.usage,
        })
    }
}
