//! Context-aware completion.
//!
//! Three sources, merged then ranked: vault keys (for `$vault.` prefixes),
//! SQL schema candidates from the vector store, and semantic command
//! suggestions. Ranking is by source priority (vault > schema > commands),
//! then similarity. Each source runs under a soft deadline; a source that
//! misses it is omitted silently.

use std::sync::Arc;

use serde::Serialize;

use crate::config::CompleterConfig;
use crate::llm::LlmManager;
use crate::vault::Vault;
use crate::vector::VectorStore;

/// Trigger prefix for vault-key completion.
pub const VAULT_PREFIX: &str = "$vault.";

/// Built-in command patterns seeded into the vector store at startup.
pub const COMMAND_PATTERNS: &[(&str, &str)] = &[
    ("connect", "connect to a database with a connection string"),
    ("disconnect", "close a named database connection"),
    ("use", "switch the active connection"),
    ("connections", "list registered connections and their pools"),
    ("query", "execute a SQL statement on the active connection"),
    ("explain", "show the execution plan for a statement"),
    ("optimize", "suggest improvements for a slow statement"),
    ("slow-queries", "list recent statements above the latency threshold"),
    ("indexes", "list, create, drop, or analyze indexes"),
    ("backup", "create, list, restore, or verify local backups"),
    ("vault", "add, get, list, remove, or rotate credentials"),
    ("health", "check component and connection health"),
    ("status", "show runtime counters and pool metrics"),
];

/// Where a completion came from; declaration order is ranking priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    Vault,
    SqlSchema,
    Command,
}

/// One ranked completion.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub text: String,
    pub source: CompletionSource,
    pub score: f64,
}

/// The completer. Cheap to share.
pub struct Completer {
    config: CompleterConfig,
    vault: Option<Arc<Vault>>,
    vector: Arc<VectorStore>,
    llm: Arc<LlmManager>,
}

impl Completer {
    pub fn new(
        config: CompleterConfig,
        vault: Option<Arc<Vault>>,
        vector: Arc<VectorStore>,
        llm: Arc<LlmManager>,
    ) -> Self {
        Self {
            config,
            vault,
            vector,
            llm,
        }
    }

    /// Complete the token at `cursor` in `buffer`. Returns the replacement
    /// start position and the ranked candidates.
    pub async fn complete(&self, buffer: &str, cursor: usize) -> (usize, Vec<Completion>) {
        let cursor = cursor.min(buffer.len());
        let before = &buffer[..cursor];
        let token_start = before
            .rfind(|c: char| c.is_whitespace())
            .map(|i| i + 1)
            .unwrap_or(0);
        let token = &before[token_start..];

        let mut candidates = if let Some(rest) = token.strip_prefix(VAULT_PREFIX) {
            self.vault_candidates(rest)
        } else if in_sql_context(buffer) {
            self.schema_candidates(token).await
        } else {
            self.command_candidates(before).await
        };

        candidates.sort_by(|a, b| {
            a.source
                .cmp(&b.source)
                .then(b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
        });
        candidates.truncate(self.config.max_results);
        (token_start, candidates)
    }

    /// Vault keys only, never values.
    fn vault_candidates(&self, partial: &str) -> Vec<Completion> {
        let Some(vault) = &self.vault else {
            return Vec::new();
        };
        vault
            .names()
            .into_iter()
            .filter(|name| name.starts_with(partial))
            .map(|name| {
                let score = if name == partial {
                    1.0
                } else {
                    partial.len() as f64 / name.len() as f64
                };
                Completion {
                    text: format!("{VAULT_PREFIX}{name}"),
                    source: CompletionSource::Vault,
                    score,
                }
            })
            .collect()
    }

    async fn schema_candidates(&self, token: &str) -> Vec<Completion> {
        if token.is_empty() || self.vector.is_empty().await {
            return Vec::new();
        }
        let deadline = self.config.deadline;
        let llm = self.llm.clone();
        let vector = self.vector.clone();
        let token = token.to_string();
        let hits = tokio::time::timeout(deadline, async move {
            let embedding = llm.embed(&token).await;
            vector.search_catalog(&embedding, 8).await.unwrap_or_default()
        })
        .await
        .unwrap_or_default();

        hits.into_iter()
            .map(|hit| Completion {
                text: hit.object.name().to_string(),
                source: CompletionSource::SqlSchema,
                score: hit.similarity,
            })
            .collect()
    }

    async fn command_candidates(&self, before: &str) -> Vec<Completion> {
        // Prefix matches on command names come first and are cheap.
        let prefix = before.trim_start();
        let mut out: Vec<Completion> = COMMAND_PATTERNS
            .iter()
            .filter(|(name, _)| !prefix.is_empty() && name.starts_with(prefix))
            .map(|(name, _)| Completion {
                text: name.to_string(),
                source: CompletionSource::Command,
                score: 1.0,
            })
            .collect();

        if self.vector.is_empty().await {
            return out;
        }
        let deadline = self.config.deadline;
        let llm = self.llm.clone();
        let vector = self.vector.clone();
        let text = before.to_string();
        let hits = tokio::time::timeout(deadline, async move {
            let embedding = llm.embed(&text).await;
            vector.search_commands(&embedding, 5).await.unwrap_or_default()
        })
        .await
        .unwrap_or_default();

        for hit in hits {
            let name = hit.object.name().to_string();
            if out.iter().all(|c| c.text != name) {
                out.push(Completion {
                    text: name,
                    source: CompletionSource::Command,
                    score: hit.similarity,
                });
            }
        }
        out
    }
}

/// Heuristic: the buffer reads as SQL when it starts with a SQL verb or
/// contains an unclosed statement.
fn in_sql_context(buffer: &str) -> bool {
    let trimmed = buffer.trim_start();
    let first = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        first.as_str(),
        "SELECT" | "INSERT" | "UPDATE" | "DELETE" | "CREATE" | "DROP" | "ALTER" | "TRUNCATE"
            | "EXPLAIN" | "SHOW" | "WITH" | "DESCRIBE"
    ) || (trimmed.contains('(') && !trimmed.contains(')'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::config::{LlmBackend, LlmConfig, LlmFunctionConfig};
    use crate::db::{CatalogEntry, CatalogKind, DatabaseKind};
    use crate::vector::IndexedObject;

    fn llm() -> Arc<LlmManager> {
        let function = LlmFunctionConfig {
            backend: LlmBackend::Rules,
            base_url: None,
            model: None,
            api_key_env: None,
        };
        let config = LlmConfig {
            deadline_ms: 100,
            max_retries: 0,
            backoff_base_ms: 1,
            embedding_dimension: 16,
            embedding_cache_size: 64,
            intent: function.clone(),
            completion: function.clone(),
            anonymizer: function.clone(),
            embedding: function,
        };
        Arc::new(LlmManager::new(config, None, None))
    }

    fn completer(vector: Arc<VectorStore>) -> Completer {
        Completer::new(
            CompleterConfig {
                deadline: Duration::from_millis(200),
                max_results: 8,
            },
            None,
            vector,
            llm(),
        )
    }

    async fn seeded_store(llm: &LlmManager) -> Arc<VectorStore> {
        let store = Arc::new(VectorStore::new(16));
        for name in ["users", "orders", "order_items"] {
            let entry = CatalogEntry::new(name, CatalogKind::Table, DatabaseKind::Postgres);
            let embedding = llm.embed(&entry.embedding_text()).await;
            store
                .insert(&embedding, IndexedObject::Catalog(entry))
                .await
                .unwrap();
        }
        for (name, description) in COMMAND_PATTERNS {
            let object = IndexedObject::Command {
                name: name.to_string(),
                description: description.to_string(),
            };
            let embedding = llm.embed(&object.embedding_text()).await;
            store.insert(&embedding, object).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn sql_context_completes_schema_objects() {
        let llm = llm();
        let store = seeded_store(&llm).await;
        let c = Completer::new(
            CompleterConfig {
                deadline: Duration::from_millis(200),
                max_results: 8,
            },
            None,
            store,
            llm,
        );

        let buffer = "SELECT * FROM users";
        let (start, completions) = c.complete(buffer, buffer.len()).await;
        assert_eq!(start, "SELECT * FROM ".len());
        assert!(!completions.is_empty());
        assert_eq!(completions[0].source, CompletionSource::SqlSchema);
        assert_eq!(completions[0].text, "users");
    }

    #[tokio::test]
    async fn command_prefixes_complete_without_embeddings() {
        let c = completer(Arc::new(VectorStore::new(16)));
        let (_, completions) = c.complete("con", 3).await;
        let texts: Vec<&str> = completions.iter().map(|c| c.text.as_str()).collect();
        assert!(texts.contains(&"connect"));
        assert!(texts.contains(&"connections"));
    }

    #[tokio::test]
    async fn empty_sql_token_returns_nothing() {
        let llm = llm();
        let store = seeded_store(&llm).await;
        let c = Completer::new(
            CompleterConfig {
                deadline: Duration::from_millis(200),
                max_results: 8,
            },
            None,
            store,
            llm,
        );
        let buffer = "SELECT * FROM ";
        let (_, completions) = c.complete(buffer, buffer.len()).await;
        assert!(completions.is_empty());
    }

    #[test]
    fn sql_context_heuristic() {
        assert!(in_sql_context("SELECT * FROM"));
        assert!(in_sql_context("insert into t ("));
        assert!(in_sql_context("somefn(unclosed"));
        assert!(!in_sql_context("ls -la"));
        assert!(!in_sql_context("connect postgres://"));
    }

    #[tokio::test]
    async fn vault_prefix_completes_names_only() {
        use crate::config::VaultConfig;
        use crate::vault::{CredentialType, FileKeystore, Vault};

        let dir = tempfile::tempdir().unwrap();
        let keystore = FileKeystore::new(dir.path(), "master");
        keystore.provision("secret").unwrap();
        let vault = Arc::new(
            Vault::open(
                &VaultConfig {
                    kdf_iterations: 100_000,
                    keystore_entry: "master".into(),
                    vault_path: dir.path().join("vault.json"),
                },
                &keystore,
            )
            .await
            .unwrap(),
        );
        vault
            .store("db_password", "hunter2", CredentialType::Standard, None)
            .unwrap();
        vault
            .store("api_token", "abcd", CredentialType::Standard, None)
            .unwrap();

        let c = Completer::new(
            CompleterConfig {
                deadline: Duration::from_millis(200),
                max_results: 8,
            },
            Some(vault),
            Arc::new(VectorStore::new(16)),
            llm(),
        );

        let buffer = "echo $vault.db";
        let (start, completions) = c.complete(buffer, buffer.len()).await;
        assert_eq!(start, "echo ".len());
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].text, "$vault.db_password");
        assert_eq!(completions[0].source, CompletionSource::Vault);
        assert!(!completions[0].text.contains("hunter2"));
    }
}
