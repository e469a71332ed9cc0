//! LLM manager: routes intent, completion, anonymisation, and embedding
//! calls to independently configured providers.
//!
//! Each logical function holds its own provider handle; switching a provider
//! at runtime swaps the handle atomically, so in-flight requests finish on
//! the old provider while new requests take the new one. Provider failures
//! retry with exponential backoff, then fall back to degraded mode
//! (rule-based intent, empty completions, deterministic hash embeddings) and
//! surface an `llm.error` event. Errors never reach the keystroke loop.

mod anonymize;
mod intent;
mod provider;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::config::{LlmConfig, LlmFunctionConfig};
use crate::error::LlmError;
use crate::events::{Event, EventBus, PRIORITY_DEFAULT};
use crate::vault::Vault;

pub use self::anonymize::{Anonymiser, AnonymisationMap};
pub use self::intent::{IntentContext, IntentKind, IntentResult, classify as classify_intent};
pub use self::provider::{ChatMessage, GenerateParams, Provider, build_provider};

/// The four logical functions the manager routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmFunction {
    Intent,
    Completion,
    Anonymizer,
    Embedding,
}

impl LlmFunction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Completion => "completion",
            Self::Anonymizer => "anonymizer",
            Self::Embedding => "embedding",
        }
    }
}

type ProviderHandle = RwLock<Option<Arc<dyn Provider>>>;

/// Exact-input LRU for embeddings.
struct EmbeddingCache {
    capacity: usize,
    map: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl EmbeddingCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        let hit = self.map.get(key).cloned();
        if hit.is_some() {
            self.touch(key);
        }
        hit
    }

    fn put(&mut self, key: String, value: Vec<f32>) {
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        } else {
            self.touch(&key);
        }
        while self.map.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            } else {
                break;
            }
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let owned = self.order.remove(pos).expect("position just found");
            self.order.push_back(owned);
        }
    }
}

/// The manager. Share behind an `Arc`.
pub struct LlmManager {
    config: LlmConfig,
    intent: ProviderHandle,
    completion: ProviderHandle,
    anonymizer_handle: ProviderHandle,
    embedding: ProviderHandle,
    anonymiser: Anonymiser,
    embed_cache: Mutex<EmbeddingCache>,
    vault: Option<Arc<Vault>>,
    bus: Option<Arc<EventBus>>,
}

impl LlmManager {
    /// Build the manager. A function whose provider cannot be constructed
    /// (missing key, bad config) starts in degraded mode; construction
    /// itself never fails fatally.
    pub fn new(config: LlmConfig, vault: Option<Arc<Vault>>, bus: Option<Arc<EventBus>>) -> Self {
        let build = |function: LlmFunction, cfg: &LlmFunctionConfig| -> Option<Arc<dyn Provider>> {
            match build_provider(function.as_str(), cfg) {
                Ok(provider) => provider,
                Err(e) => {
                    tracing::warn!(
                        function = function.as_str(),
                        error = %e,
                        "LLM provider unavailable, starting degraded"
                    );
                    None
                }
            }
        };
        let intent = build(LlmFunction::Intent, &config.intent);
        let completion = build(LlmFunction::Completion, &config.completion);
        let anonymizer = build(LlmFunction::Anonymizer, &config.anonymizer);
        let embedding = build(LlmFunction::Embedding, &config.embedding);

        Self {
            embed_cache: Mutex::new(EmbeddingCache::new(config.embedding_cache_size)),
            intent: RwLock::new(intent),
            completion: RwLock::new(completion),
            anonymizer_handle: RwLock::new(anonymizer),
            embedding: RwLock::new(embedding),
            anonymiser: Anonymiser::new(),
            vault,
            bus,
            config,
        }
    }

    /// Dimension of embeddings this manager produces.
    pub fn embedding_dimension(&self) -> usize {
        self.config.embedding_dimension
    }

    /// Atomically switch one function to a new provider configuration.
    /// In-flight requests keep their old handle clone.
    pub fn switch_provider(
        &self,
        function: LlmFunction,
        cfg: &LlmFunctionConfig,
    ) -> Result<(), LlmError> {
        let provider = build_provider(function.as_str(), cfg)?;
        *self.handle(function).write().expect("provider handle poisoned") = provider;
        Ok(())
    }

    fn handle(&self, function: LlmFunction) -> &ProviderHandle {
        match function {
            LlmFunction::Intent => &self.intent,
            LlmFunction::Completion => &self.completion,
            LlmFunction::Anonymizer => &self.anonymizer_handle,
            LlmFunction::Embedding => &self.embedding,
        }
    }

    fn provider(&self, function: LlmFunction) -> Option<Arc<dyn Provider>> {
        self.handle(function)
            .read()
            .expect("provider handle poisoned")
            .clone()
    }

    /// Classify a user input line. Provider-backed when routed, rule-based
    /// otherwise or on failure.
    pub async fn analyze_intent(&self, input: &str, context: &IntentContext) -> IntentResult {
        if input.trim().is_empty() {
            return IntentResult::other();
        }
        let Some(provider) = self.provider(LlmFunction::Intent) else {
            return classify_intent(input);
        };

        let messages = vec![
            ChatMessage::system(
                "You classify terminal input for a database shell. Reply with JSON only: \
                 {\"intent\": one of file_operation|database_query|navigation|vault_access|other, \
                 \"confidence\": number 0..1, \"suggested_commands\": [strings]}",
            ),
            ChatMessage::user(format!(
                "cwd: {}\nmodule: {}\nrecent: {}\ninput: {}",
                context.cwd,
                context.current_module,
                context.recent_history.join(" | "),
                input
            )),
        ];

        match self
            .with_retry(LlmFunction::Intent, || {
                let provider = provider.clone();
                let messages = messages.clone();
                async move {
                    provider
                        .generate(&messages, &GenerateParams::default())
                        .await
                }
            })
            .await
        {
            Ok(raw) => parse_intent_response(&raw).unwrap_or_else(|| classify_intent(input)),
            Err(_) => classify_intent(input),
        }
    }

    /// Free-text completion suggestions. Empty in degraded mode.
    pub async fn complete(&self, input: &str, context: &IntentContext) -> Vec<String> {
        let Some(provider) = self.provider(LlmFunction::Completion) else {
            return Vec::new();
        };
        let messages = vec![
            ChatMessage::system(
                "Suggest up to 5 completions for the partial shell/database input. \
                 One suggestion per line, no commentary.",
            ),
            ChatMessage::user(format!("cwd: {}\ninput: {}", context.cwd, input)),
        ];
        match self
            .with_retry(LlmFunction::Completion, || {
                let provider = provider.clone();
                let messages = messages.clone();
                async move {
                    provider
                        .generate(&messages, &GenerateParams::default())
                        .await
                }
            })
            .await
        {
            Ok(raw) => raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .take(5)
                .map(str::to_string)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Pseudonymise sensitive spans. Local scan; the vault snapshot
    /// contributes credential matches.
    pub fn anonymise(&self, text: &str) -> (String, AnonymisationMap) {
        let snapshot = self.vault.as_ref().map(|v| v.redaction_snapshot());
        self.anonymiser.anonymise(text, snapshot.as_ref())
    }

    /// Exact reversal of [`LlmManager::anonymise`].
    pub fn deanonymise(&self, text: &str, map: &AnonymisationMap) -> String {
        self.anonymiser.deanonymise(text, map)
    }

    /// Embed a string. Cache hits bypass the provider entirely; with no
    /// provider (or after retries fail) a deterministic feature-hash
    /// embedding keeps search working offline.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        if let Some(hit) = self
            .embed_cache
            .lock()
            .expect("embed cache poisoned")
            .get(text)
        {
            return hit;
        }

        let dimension = self.config.embedding_dimension;
        let embedded = match self.provider(LlmFunction::Embedding) {
            Some(provider) => {
                match self
                    .with_retry(LlmFunction::Embedding, || {
                        let provider = provider.clone();
                        let text = text.to_string();
                        async move { provider.embed(&text).await }
                    })
                    .await
                {
                    Ok(vector) if vector.len() == dimension => vector,
                    Ok(vector) => {
                        tracing::warn!(
                            got = vector.len(),
                            expected = dimension,
                            "provider embedding dimension mismatch, using hash embedding"
                        );
                        hash_embedding(text, dimension)
                    }
                    Err(_) => hash_embedding(text, dimension),
                }
            }
            None => hash_embedding(text, dimension),
        };

        self.embed_cache
            .lock()
            .expect("embed cache poisoned")
            .put(text.to_string(), embedded.clone());
        embedded
    }

    /// Embed a batch, reusing the cache per input.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await);
        }
        out
    }

    /// Short, best-effort explanation of a database error. `None` in
    /// degraded mode.
    pub async fn explain_error(&self, statement: &str, error: &str) -> Option<String> {
        let provider = self.provider(LlmFunction::Completion)?;
        let (anon_stmt, map) = self.anonymise(statement);
        let messages = vec![
            ChatMessage::system("Explain the database error in two sentences, plainly."),
            ChatMessage::user(format!("statement: {anon_stmt}\nerror: {error}")),
        ];
        let raw = self
            .with_retry(LlmFunction::Completion, || {
                let provider = provider.clone();
                let messages = messages.clone();
                async move {
                    provider
                        .generate(&messages, &GenerateParams::default())
                        .await
                }
            })
            .await
            .ok()?;
        Some(self.deanonymise(&raw, &map))
    }

    /// Retry with exponential backoff and a per-call deadline. The terminal
    /// failure publishes `llm.error` and is returned for the caller's
    /// fallback; it is never propagated to the keystroke loop.
    async fn with_retry<T, F, Fut>(&self, function: LlmFunction, op: F) -> Result<T, LlmError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, LlmError>>,
    {
        let deadline = Duration::from_millis(self.config.deadline_ms);
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let shift = (attempt - 1).min(16);
                let backoff = self.config.backoff_base_ms.saturating_mul(1u64 << shift);
                let jitter = u64::from(rand::random::<u8>()) % (backoff / 2 + 1);
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }
            match tokio::time::timeout(deadline, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => {
                    last_error = Some(LlmError::Timeout {
                        provider: function.as_str().to_string(),
                        timeout: deadline,
                    })
                }
            }
        }
        let error = last_error.unwrap_or(LlmError::Unsupported {
            provider: function.as_str().to_string(),
            function: function.as_str().to_string(),
        });
        if let Some(bus) = &self.bus {
            let _ = bus.publish(Event::new(
                "llm.error",
                serde_json::json!({
                    "function": function.as_str(),
                    "error": error.to_string(),
                }),
                PRIORITY_DEFAULT,
            ));
        }
        Err(error)
    }
}

/// Parse a provider's intent JSON, tolerating code fences.
fn parse_intent_response(raw: &str) -> Option<IntentResult> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```"))
        .unwrap_or(trimmed);
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let primary_intent = IntentKind::parse(value.get("intent")?.as_str()?)?;
    let confidence = value
        .get("confidence")
        .and_then(|c| c.as_f64())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    let suggested_commands = value
        .get("suggested_commands")
        .and_then(|s| s.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    Some(IntentResult {
        primary_intent,
        confidence,
        suggested_commands,
        anonymisation_map: None,
    })
}

/// Deterministic feature-hash embedding: tokens hash into signed buckets,
/// then the vector is L2-normalised. Not semantic, but stable and
/// dimension-correct for offline operation.
pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension.max(1)];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.as_bytes());
        let bucket = usize::from(digest[0]) << 8 | usize::from(digest[1]);
        let index = bucket % vector.len();
        let sign = if digest[2] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmBackend;

    fn rules_function() -> LlmFunctionConfig {
        LlmFunctionConfig {
            backend: LlmBackend::Rules,
            base_url: None,
            model: None,
            api_key_env: None,
        }
    }

    fn rules_config() -> LlmConfig {
        LlmConfig {
            deadline_ms: 100,
            max_retries: 0,
            backoff_base_ms: 1,
            embedding_dimension: 32,
            embedding_cache_size: 16,
            intent: rules_function(),
            completion: rules_function(),
            anonymizer: rules_function(),
            embedding: rules_function(),
        }
    }

    fn manager() -> LlmManager {
        LlmManager::new(rules_config(), None, None)
    }

    #[tokio::test]
    async fn degraded_intent_uses_rules() {
        let m = manager();
        let result = m
            .analyze_intent("SELECT * FROM users", &IntentContext::default())
            .await;
        assert_eq!(result.primary_intent, IntentKind::DatabaseQuery);

        let empty = m.analyze_intent("", &IntentContext::default()).await;
        assert_eq!(empty.primary_intent, IntentKind::Other);
        assert_eq!(empty.confidence, 0.0);
    }

    #[tokio::test]
    async fn degraded_completion_is_empty() {
        let m = manager();
        assert!(m.complete("sel", &IntentContext::default()).await.is_empty());
    }

    #[tokio::test]
    async fn hash_embeddings_are_deterministic_and_cached() {
        let m = manager();
        let a = m.embed("users table").await;
        let b = m.embed("users table").await;
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.iter().any(|v| *v != 0.0));

        let other = m.embed("orders table").await;
        assert_ne!(a, other);
    }

    #[tokio::test]
    async fn anonymise_round_trips_through_manager() {
        let m = manager();
        let input = "report 10.1.2.3 to ops@example.com";
        let (anonymised, map) = m.anonymise(input);
        assert_ne!(anonymised, input);
        assert_eq!(m.deanonymise(&anonymised, &map), input);
    }

    #[test]
    fn intent_response_parsing_handles_fences_and_clamps() {
        let raw = "```json\n{\"intent\": \"database_query\", \"confidence\": 3.5}\n```";
        let parsed = parse_intent_response(raw).unwrap();
        assert_eq!(parsed.primary_intent, IntentKind::DatabaseQuery);
        assert_eq!(parsed.confidence, 1.0);

        assert!(parse_intent_response("not json").is_none());
        assert!(parse_intent_response("{\"intent\": \"weird\"}").is_none());
    }

    #[test]
    fn switch_provider_is_atomic_per_function() {
        let m = manager();
        assert!(m.provider(LlmFunction::Intent).is_none());

        let cfg = LlmFunctionConfig {
            backend: LlmBackend::SelfHosted,
            base_url: Some("http://localhost:9999/v1".into()),
            model: None,
            api_key_env: None,
        };
        m.switch_provider(LlmFunction::Intent, &cfg).unwrap();
        assert!(m.provider(LlmFunction::Intent).is_some());
        // Other functions are untouched.
        assert!(m.provider(LlmFunction::Completion).is_none());
    }

    #[test]
    fn lru_cache_evicts_oldest() {
        let mut cache = EmbeddingCache::new(2);
        cache.put("a".into(), vec![1.0]);
        cache.put("b".into(), vec![2.0]);
        assert!(cache.get("a").is_some());
        cache.put("c".into(), vec![3.0]);
        // "b" was least recently used.
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }
}
