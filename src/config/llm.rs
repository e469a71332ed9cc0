//! LLM manager configuration.
//!
//! Each logical function (intent, completion, anonymizer, embedding) is
//! independently routable to a backend. API keys are never stored in config;
//! the config names the env var that holds them (`api_key_env`).

use serde::Deserialize;

use super::helpers::normalize_variant;
use crate::error::ConfigError;

/// Which provider implementation serves a logical function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    /// Local server speaking the minimal chat-style contract.
    SelfHosted,
    /// Public chat-completion API.
    OpenAiCompatible,
    /// Claude-style messages API.
    AnthropicCompatible,
    /// Cheaper chat-completion provider.
    DeepSeekCompatible,
    /// No provider: rule-based intent, empty completions, hash embeddings.
    Rules,
}

impl LlmBackend {
    pub fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match normalize_variant(value).as_str() {
            "self_hosted" | "local" => Ok(Self::SelfHosted),
            "openai" | "openai_compatible" => Ok(Self::OpenAiCompatible),
            "anthropic" | "claude" => Ok(Self::AnthropicCompatible),
            "deepseek" | "deepseek_compatible" => Ok(Self::DeepSeekCompatible),
            "rules" | "none" => Ok(Self::Rules),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!(
                    "expected 'self_hosted', 'openai', 'anthropic', 'deepseek', or 'rules', got '{value}'"
                ),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelfHosted => "self_hosted",
            Self::OpenAiCompatible => "openai",
            Self::AnthropicCompatible => "anthropic",
            Self::DeepSeekCompatible => "deepseek",
            Self::Rules => "rules",
        }
    }
}

/// Raw per-function section from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmFunctionFile {
    pub backend: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
}

/// Resolved provider routing for one logical function.
#[derive(Debug, Clone)]
pub struct LlmFunctionConfig {
    pub backend: LlmBackend,
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Name of the env var holding the API key, if the backend needs one.
    pub api_key_env: Option<String>,
}

impl LlmFunctionConfig {
    fn resolve(file: &LlmFunctionFile, key_prefix: &str) -> Result<Self, ConfigError> {
        let backend = match &file.backend {
            Some(raw) => LlmBackend::parse(raw, &format!("{key_prefix}.backend"))?,
            None => LlmBackend::Rules,
        };
        Ok(Self {
            backend,
            base_url: file.base_url.clone(),
            model: file.model.clone(),
            api_key_env: file.api_key_env.clone(),
        })
    }
}

/// Raw `[llm]` section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmFile {
    pub deadline_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub embedding_dimension: Option<usize>,
    pub embedding_cache_size: Option<usize>,
    #[serde(default)]
    pub intent: LlmFunctionFile,
    #[serde(default)]
    pub completion: LlmFunctionFile,
    #[serde(default)]
    pub anonymizer: LlmFunctionFile,
    #[serde(default)]
    pub embedding: LlmFunctionFile,
}

/// Resolved LLM manager configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Per-call deadline. Shorter than database deadlines on purpose.
    pub deadline_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub embedding_dimension: usize,
    pub embedding_cache_size: usize,
    pub intent: LlmFunctionConfig,
    pub completion: LlmFunctionConfig,
    pub anonymizer: LlmFunctionConfig,
    pub embedding: LlmFunctionConfig,
}

impl LlmConfig {
    pub(crate) fn resolve(file: &LlmFile) -> Result<Self, ConfigError> {
        Ok(Self {
            deadline_ms: file.deadline_ms.unwrap_or(2_000),
            max_retries: file.max_retries.unwrap_or(3),
            backoff_base_ms: file.backoff_base_ms.unwrap_or(200),
            embedding_dimension: file.embedding_dimension.unwrap_or(256),
            embedding_cache_size: file.embedding_cache_size.unwrap_or(1_024),
            intent: LlmFunctionConfig::resolve(&file.intent, "llm.intent")?,
            completion: LlmFunctionConfig::resolve(&file.completion, "llm.completion")?,
            anonymizer: LlmFunctionConfig::resolve(&file.anonymizer, "llm.anonymizer")?,
            embedding: LlmFunctionConfig::resolve(&file.embedding, "llm.embedding")?,
        })
    }
}
