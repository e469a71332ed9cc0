//! LLM provider implementations over the minimal contract:
//! `generate(messages, params) -> text`, optionally `embed(text) -> vector`.
//!
//! Two wire shapes cover all four backends: the OpenAI-style
//! `/chat/completions` contract (self-hosted, OpenAI-compatible,
//! DeepSeek-compatible) and the Claude-style `/v1/messages` contract.
//! API keys are read from the env var named in config; nothing here knows a
//! provider-specific variable name.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::{LlmBackend, LlmFunctionConfig};
use crate::error::LlmError;

/// One chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Generation parameters.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.2,
        }
    }
}

/// Minimal provider contract. Streaming and richer features are
/// provider-specific and outside this core.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerateParams,
    ) -> Result<String, LlmError>;

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        Err(LlmError::Unsupported {
            provider: self.name().to_string(),
            function: "embed".to_string(),
        })
    }
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name()).finish()
    }
}

/// Build the provider for one logical function. `None` means unrouted:
/// the manager serves the function with its rule-based fallback.
pub fn build_provider(
    function: &str,
    config: &LlmFunctionConfig,
) -> Result<Option<std::sync::Arc<dyn Provider>>, LlmError> {
    let api_key = match &config.api_key_env {
        Some(var) => match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Some(SecretString::from(value)),
            _ => None,
        },
        None => None,
    };

    let provider: std::sync::Arc<dyn Provider> = match config.backend {
        LlmBackend::Rules => return Ok(None),
        LlmBackend::SelfHosted => {
            let base_url = config.base_url.clone().ok_or_else(|| {
                LlmError::InvalidResponse {
                    provider: "self_hosted".into(),
                    reason: "self-hosted backend requires base_url".into(),
                }
            })?;
            std::sync::Arc::new(OpenAiStyleProvider::new(
                format!("self_hosted/{function}"),
                base_url,
                config.model.clone().unwrap_or_else(|| "local".into()),
                api_key,
            ))
        }
        LlmBackend::OpenAiCompatible => {
            let key = api_key.ok_or_else(|| missing_key(config, "openai"))?;
            std::sync::Arc::new(OpenAiStyleProvider::new(
                format!("openai/{function}"),
                config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".into()),
                config.model.clone().unwrap_or_else(|| "gpt-4o-mini".into()),
                Some(key),
            ))
        }
        LlmBackend::DeepSeekCompatible => {
            let key = api_key.ok_or_else(|| missing_key(config, "deepseek"))?;
            std::sync::Arc::new(OpenAiStyleProvider::new(
                format!("deepseek/{function}"),
                config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.deepseek.com/v1".into()),
                config.model.clone().unwrap_or_else(|| "deepseek-chat".into()),
                Some(key),
            ))
        }
        LlmBackend::AnthropicCompatible => {
            let key = api_key.ok_or_else(|| missing_key(config, "anthropic"))?;
            std::sync::Arc::new(AnthropicStyleProvider::new(
                format!("anthropic/{function}"),
                config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.anthropic.com".into()),
                config
                    .model
                    .clone()
                    .unwrap_or_else(|| "claude-3-5-haiku-latest".into()),
                key,
            ))
        }
    };
    Ok(Some(provider))
}

fn missing_key(config: &LlmFunctionConfig, provider: &str) -> LlmError {
    match &config.api_key_env {
        Some(var) => LlmError::MissingApiKey(var.clone()),
        None => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: "api_key_env is not configured".to_string(),
        },
    }
}

/// OpenAI-style `/chat/completions` + `/embeddings` provider.
pub struct OpenAiStyleProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OpenAiStyleProvider {
    pub fn new(
        name: String,
        base_url: String,
        model: String,
        api_key: Option<SecretString>,
    ) -> Self {
        Self {
            name,
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl Provider for OpenAiStyleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerateParams,
    ) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });
        let response = self
            .authorize(self.client.post(format!("{}/chat/completions", self.base_url)))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: self.name.clone(),
                reason: format!("HTTP {status}"),
            });
        }
        let payload: serde_json::Value = response.json().await?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.name.clone(),
                reason: "missing choices[0].message.content".into(),
            })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let response = self
            .authorize(self.client.post(format!("{}/embeddings", self.base_url)))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: self.name.clone(),
                reason: format!("HTTP {status}"),
            });
        }
        let payload: serde_json::Value = response.json().await?;
        let embedding = payload
            .pointer("/data/0/embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.name.clone(),
                reason: "missing data[0].embedding".into(),
            })?;
        Ok(embedding
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect())
    }
}

/// Claude-style `/v1/messages` provider.
pub struct AnthropicStyleProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

const ANTHROPIC_VERSION: &str = "2023-06-01";

impl AnthropicStyleProvider {
    pub fn new(name: String, base_url: String, model: String, api_key: SecretString) -> Self {
        Self {
            name,
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }
}

#[async_trait]
impl Provider for AnthropicStyleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerateParams,
    ) -> Result<String, LlmError> {
        // The messages API takes `system` as a top-level field.
        let system: String = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let chat: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != "system").collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "messages": chat,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system);
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: self.name.clone(),
                reason: format!("HTTP {status}"),
            });
        }
        let payload: serde_json::Value = response.json().await?;
        payload
            .pointer("/content/0/text")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.name.clone(),
                reason: "missing content[0].text".into(),
            })
    }
}
