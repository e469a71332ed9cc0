//! Core orchestrator: module registry, construction order, health
//! aggregation, and cooperative shutdown.
//!
//! Components are built leaves-first (vault, bus, LLM manager, vector
//! store, history, clients) and the dependent layers (enrichment pipeline,
//! completer, gate) start once those are up. Shutdown walks the reverse
//! order: the pipeline stops, pools drain under a deadline and force-close
//! the remainder, the bus closes last.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::completer::{COMMAND_PATTERNS, Completer};
use crate::config::Config;
use crate::db::{Client, ClientRegistry, DatabaseClient, Dsn, new_registry};
use crate::enrichment::{EnrichmentContext, EnrichmentPipeline};
use crate::error::{Error, OrchestratorError, Result, VaultError};
use crate::events::EventBus;
use crate::gate::SqlGate;
use crate::history::History;
use crate::llm::LlmManager;
use crate::panels::PanelOrchestrator;
use crate::vault::{CredentialType, Keystore, Vault};
use crate::vector::{IndexedObject, VectorStore};

/// Health of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// One health check result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthCheck {
    pub fn healthy() -> Self {
        Self {
            status: HealthState::Healthy,
            detail: None,
        }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: HealthState::Degraded,
            detail: Some(detail.into()),
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            status: HealthState::Unhealthy,
            detail: Some(detail.into()),
        }
    }
}

/// Aggregated health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub checks: HashMap<String, HealthCheck>,
}

/// A pluggable module with a health probe and a stop signal.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;
    async fn health(&self) -> HealthCheck;
    async fn stop(&self) {}
}

/// Vault credential prefix for persisted connection strings.
const CONNECTION_PREFIX: &str = "connection/";

impl std::fmt::Debug for CoreOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreOrchestrator").finish_non_exhaustive()
    }
}

/// The orchestrator. Owns every component; upward communication from
/// components happens through the event bus only.
pub struct CoreOrchestrator {
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub vault: Arc<Vault>,
    pub llm: Arc<LlmManager>,
    pub vector: Arc<VectorStore>,
    pub history: Arc<History>,
    pub clients: ClientRegistry,
    pub gate: Arc<SqlGate>,
    pub pipeline: Arc<EnrichmentPipeline>,
    pub completer: Arc<Completer>,
    pub panels: Arc<PanelOrchestrator>,
    /// Session scope for enrichment supersession.
    pub session: Uuid,
    registry: RwLock<HashMap<String, Arc<dyn Module>>>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl CoreOrchestrator {
    /// Construct and start the core. Fails closed when the keystore entry
    /// is missing; everything else degrades rather than failing.
    pub async fn start(config: Config, keystore: &dyn Keystore) -> Result<Arc<Self>> {
        crate::bootstrap::ensure_private_dir(&config.state_dir).map_err(Error::Io)?;

        // C1: vault (fatal when the keystore is unavailable).
        let vault = Arc::new(Vault::open(&config.vault, keystore).await?);

        // C6: event bus, started early so construction can publish.
        let bus = EventBus::new(config.events.clone());
        let bus_task = bus.start();

        // C5: LLM manager (never fatal).
        let llm = Arc::new(LlmManager::new(
            config.llm.clone(),
            Some(vault.clone()),
            Some(bus.clone()),
        ));

        // C4: vector store, restoring a snapshot when the dimension matches.
        let snapshot_path = config.state_dir.join("vector-index.json");
        let vector = if snapshot_path.exists() {
            match VectorStore::load_snapshot(&snapshot_path, llm.embedding_dimension()) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %e, "vector snapshot rejected, rebuilding empty");
                    Arc::new(VectorStore::new(llm.embedding_dimension()))
                }
            }
        } else {
            Arc::new(VectorStore::new(llm.embedding_dimension()))
        };

        // History log.
        let history = Arc::new(
            History::open(config.state_dir.join("history.jsonl")).map_err(Error::Io)?,
        );

        // C3: client registry (connections are opened on demand).
        let clients = new_registry();

        // Seed command patterns so the completer works before any ingest.
        for (name, description) in COMMAND_PATTERNS {
            let object = IndexedObject::Command {
                name: (*name).to_string(),
                description: (*description).to_string(),
            };
            let embedding = llm.embed(&object.embedding_text()).await;
            if let Err(e) = vector.insert(&embedding, object).await {
                tracing::warn!(error = %e, "failed to seed command pattern");
            }
        }

        // C7-C10 start once their dependencies are up.
        let pipeline = EnrichmentPipeline::new(
            config.enrichment.clone(),
            bus.clone(),
            EnrichmentContext {
                llm: llm.clone(),
                vector: vector.clone(),
                vault: Some(vault.clone()),
                history: Some(history.clone()),
                clients: clients.clone(),
            },
        );
        let pipeline_task = pipeline.start();

        let completer = Arc::new(Completer::new(
            config.completer.clone(),
            Some(vault.clone()),
            vector.clone(),
            llm.clone(),
        ));
        let panels = Arc::new(PanelOrchestrator::new(bus.clone()));
        let gate = Arc::new(SqlGate::new(
            vault.clone(),
            history.clone(),
            llm.clone(),
            bus.clone(),
        ));

        let core = Arc::new(Self {
            config,
            bus,
            vault,
            llm,
            vector,
            history,
            clients,
            gate,
            pipeline,
            completer,
            panels,
            session: Uuid::new_v4(),
            registry: RwLock::new(HashMap::new()),
            tasks: std::sync::Mutex::new(vec![bus_task, pipeline_task]),
        });
        Ok(core)
    }

    /// Register a named module. Duplicates are rejected.
    pub async fn register_module(&self, module: Arc<dyn Module>) -> Result<()> {
        let mut registry = self.registry.write().await;
        let name = module.name().to_string();
        if registry.contains_key(&name) {
            return Err(Error::Orchestrator(OrchestratorError::DuplicateModule(
                name,
            )));
        }
        registry.insert(name, module);
        Ok(())
    }

    /// Open a named connection and persist its DSN in the vault.
    pub async fn connect(&self, name: &str, dsn_text: &str) -> Result<Arc<Client>> {
        let dsn = Dsn::parse(dsn_text).map_err(Error::Database)?;
        {
            let clients = self.clients.read().await;
            if clients.contains_key(name) {
                return Err(Error::Vault(VaultError::DuplicateName(name.to_string())));
            }
        }

        let client = Arc::new(
            Client::connect(&dsn, &self.config.database, Some(self.bus.clone())).await?,
        );
        client
            .pool()
            .start_sweep(self.config.database.health_sweep_interval);

        // Persist for later invocations; tolerate re-registration.
        let credential = format!("{CONNECTION_PREFIX}{name}");
        match self
            .vault
            .store(&credential, dsn_text, CredentialType::Standard, None)
        {
            Ok(_) | Err(VaultError::DuplicateName(_)) => {}
            Err(e) => return Err(Error::Vault(e)),
        }

        self.clients
            .write()
            .await
            .insert(name.to_string(), client.clone());

        // Catalog ingest in the background; completion quality degrades
        // gracefully when it fails.
        self.spawn_catalog_ingest(name.to_string(), client.clone());
        Ok(client)
    }

    /// Resolve a named connection, reconnecting from the vault if needed.
    pub async fn client(&self, name: &str) -> Result<Arc<Client>> {
        if let Some(client) = self.clients.read().await.get(name) {
            return Ok(client.clone());
        }
        let credential = format!("{CONNECTION_PREFIX}{name}");
        let dsn_text = self
            .vault
            .retrieve(&credential, false)
            .map_err(|_| Error::Database(crate::error::DbError::UnknownConnection(name.into())))?;
        let dsn = Dsn::parse(secrecy::ExposeSecret::expose_secret(&dsn_text))
            .map_err(Error::Database)?;
        let client = Arc::new(
            Client::connect(&dsn, &self.config.database, Some(self.bus.clone())).await?,
        );
        client
            .pool()
            .start_sweep(self.config.database.health_sweep_interval);
        self.clients
            .write()
            .await
            .insert(name.to_string(), client.clone());
        Ok(client)
    }

    /// Close a named connection and remove its registration.
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        let client = self.clients.write().await.remove(name);
        let credential = format!("{CONNECTION_PREFIX}{name}");
        let had_registration = self.vault.delete(&credential).is_ok();

        match client {
            Some(client) => {
                client.pool().drain(Duration::from_secs(5)).await;
                Ok(())
            }
            None if had_registration => Ok(()),
            None => Err(Error::Database(crate::error::DbError::UnknownConnection(
                name.into(),
            ))),
        }
    }

    /// Names of registered connections (memory + vault-persisted).
    pub async fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.read().await.keys().cloned().collect();
        for name in self.vault.names() {
            if let Some(stripped) = name.strip_prefix(CONNECTION_PREFIX)
                && !names.iter().any(|n| n == stripped)
            {
                names.push(stripped.to_string());
            }
        }
        names.sort();
        names
    }

    /// Aggregate health across built-in components, live connections, and
    /// registered modules.
    pub async fn health(&self) -> HealthReport {
        let mut checks = HashMap::new();

        checks.insert(
            "vault".to_string(),
            if self.vault.list().iter().any(|c| c.quarantined) {
                HealthCheck::degraded("quarantined credentials present")
            } else {
                HealthCheck::healthy()
            },
        );

        let dropped = self
            .bus
            .counters
            .dropped
            .load(std::sync::atomic::Ordering::Relaxed);
        checks.insert(
            "event_bus".to_string(),
            if dropped > 0 {
                HealthCheck::degraded(format!("{dropped} events dropped"))
            } else {
                HealthCheck::healthy()
            },
        );

        checks.insert(
            "vector_store".to_string(),
            HealthCheck {
                status: HealthState::Healthy,
                detail: Some(format!("{} objects", self.vector.len().await)),
            },
        );

        checks.insert(
            "enrichment".to_string(),
            HealthCheck {
                status: HealthState::Healthy,
                detail: Some(format!(
                    "processed {}, skipped {}",
                    self.pipeline
                        .processed_count
                        .load(std::sync::atomic::Ordering::Relaxed),
                    self.pipeline
                        .skipped_count
                        .load(std::sync::atomic::Ordering::Relaxed),
                )),
            },
        );

        for (name, client) in self.clients.read().await.iter() {
            let health = client.health().await;
            checks.insert(
                format!("connection/{name}"),
                if health.healthy {
                    HealthCheck {
                        status: HealthState::Healthy,
                        detail: Some(format!("{} ms", health.latency_ms)),
                    }
                } else {
                    HealthCheck::unhealthy(health.detail.unwrap_or_default())
                },
            );
        }

        for (name, module) in self.registry.read().await.iter() {
            checks.insert(name.clone(), module.health().await);
        }

        let status = if checks.values().any(|c| c.status == HealthState::Unhealthy) {
            HealthState::Unhealthy
        } else if checks.values().any(|c| c.status == HealthState::Degraded) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthReport { status, checks }
    }

    /// Cooperative shutdown in reverse dependency order with a deadline;
    /// whatever misses the deadline is aborted.
    pub async fn shutdown(&self, deadline: Duration) {
        let started = tokio::time::Instant::now();

        // C7-C10 first.
        self.pipeline.stop();
        for module in self.registry.read().await.values() {
            module.stop().await;
        }

        // Persist the vector index; best-effort.
        let snapshot_path = self.config.state_dir.join("vector-index.json");
        if let Err(e) = self.vector.save_snapshot(&snapshot_path).await {
            tracing::warn!(error = %e, "vector snapshot not saved");
        }

        // Drain pools under the remaining deadline; residual connections
        // are force-closed by drain itself.
        let clients: Vec<Arc<Client>> = self.clients.read().await.values().cloned().collect();
        for client in clients {
            let remaining = deadline.saturating_sub(started.elapsed());
            let clean = client.pool().drain(remaining.max(Duration::from_millis(10))).await;
            if !clean {
                tracing::warn!("pool drain deadline exceeded, connections force-closed");
            }
        }

        // C6 last; then abort any stragglers.
        self.bus.close();
        let mut tasks = self.tasks.lock().expect("task list poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    fn spawn_catalog_ingest(&self, name: String, client: Arc<Client>) {
        let llm = self.llm.clone();
        let vector = self.vector.clone();
        let handle = tokio::spawn(async move {
            match client.load_catalog().await {
                Ok(entries) => {
                    let count = entries.len();
                    let texts: Vec<String> =
                        entries.iter().map(|e| e.embedding_text()).collect();
                    let embeddings = llm.embed_batch(&texts).await;
                    for (entry, embedding) in entries.into_iter().zip(embeddings) {
                        if let Err(e) = vector
                            .insert(&embedding, IndexedObject::Catalog(entry))
                            .await
                        {
                            tracing::warn!(error = %e, "catalog insert failed");
                            break;
                        }
                    }
                    tracing::info!(connection = %name, objects = count, "catalog ingested");
                }
                Err(e) => {
                    tracing::warn!(connection = %name, error = %e, "catalog ingest failed");
                }
            }
        });
        self.tasks.lock().expect("task list poisoned").push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CompleterConfig, DatabaseConfig, EnrichmentConfig, EventBusConfig, LlmBackend, LlmConfig,
        LlmFunctionConfig, OutputFormat, VaultConfig,
    };
    use crate::vault::FileKeystore;

    /// Explicit configuration, independent of the process environment.
    fn test_config(dir: &std::path::Path) -> Config {
        let function = LlmFunctionConfig {
            backend: LlmBackend::Rules,
            base_url: None,
            model: None,
            api_key_env: None,
        };
        Config {
            state_dir: dir.to_path_buf(),
            vault: VaultConfig {
                kdf_iterations: 100_000,
                keystore_entry: "master".to_string(),
                vault_path: dir.join("vault.json"),
            },
            database: DatabaseConfig {
                pool_min: 1,
                pool_max: 4,
                acquire_timeout: Duration::from_secs(1),
                validation_window: Duration::from_secs(5),
                max_validation_retries: 3,
                health_sweep_interval: Duration::from_secs(30),
                statement_timeout: Duration::from_secs(30),
            },
            events: EventBusConfig {
                high_water_mark: 256,
                critical_publish_deadline: Duration::from_millis(200),
            },
            enrichment: EnrichmentConfig {
                staleness_window: Duration::from_secs(1),
                gatherer_deadline: Duration::from_millis(250),
                queue_capacity: 8,
            },
            completer: CompleterConfig {
                deadline: Duration::from_millis(50),
                max_results: 16,
            },
            llm: LlmConfig {
                deadline_ms: 100,
                max_retries: 0,
                backoff_base_ms: 1,
                embedding_dimension: 16,
                embedding_cache_size: 64,
                intent: function.clone(),
                completion: function.clone(),
                anonymizer: function.clone(),
                embedding: function,
            },
            output_format: OutputFormat::Text,
        }
    }

    async fn core_fixture() -> (Arc<CoreOrchestrator>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let keystore = FileKeystore::new(dir.path(), "master");
        keystore.provision("core-test-secret").unwrap();

        let core = CoreOrchestrator::start(test_config(dir.path()), &keystore)
            .await
            .unwrap();
        (core, dir)
    }

    struct StaticModule {
        name: String,
        check: HealthCheck,
    }

    #[async_trait]
    impl Module for StaticModule {
        fn name(&self) -> &str {
            &self.name
        }

        async fn health(&self) -> HealthCheck {
            self.check.clone()
        }
    }

    #[tokio::test]
    async fn startup_fails_closed_without_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = FileKeystore::new(dir.path(), "missing");

        let err = CoreOrchestrator::start(test_config(dir.path()), &keystore)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::KeystoreUnavailable);
    }

    #[tokio::test]
    async fn duplicate_module_registration_is_rejected() {
        let (core, _dir) = core_fixture().await;
        core.register_module(Arc::new(StaticModule {
            name: "metrics".into(),
            check: HealthCheck::healthy(),
        }))
        .await
        .unwrap();

        let err = core
            .register_module(Arc::new(StaticModule {
                name: "metrics".into(),
                check: HealthCheck::healthy(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DuplicateName);

        core.shutdown(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn health_aggregates_worst_status() {
        let (core, _dir) = core_fixture().await;

        let report = core.health().await;
        assert_eq!(report.status, HealthState::Healthy);

        core.register_module(Arc::new(StaticModule {
            name: "flaky".into(),
            check: HealthCheck::degraded("sometimes"),
        }))
        .await
        .unwrap();
        assert_eq!(core.health().await.status, HealthState::Degraded);

        core.register_module(Arc::new(StaticModule {
            name: "down".into(),
            check: HealthCheck::unhealthy("dead"),
        }))
        .await
        .unwrap();
        assert_eq!(core.health().await.status, HealthState::Unhealthy);

        core.shutdown(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn sqlite_connection_round_trip_through_core() {
        let (core, dir) = core_fixture().await;
        let dsn = format!("sqlite://{}", dir.path().join("app.db").display());

        core.connect("local", &dsn).await.unwrap();
        assert!(core.connection_names().await.contains(&"local".to_string()));

        // The DSN is persisted in the vault: a registry miss (fresh process)
        // reconnects from the stored connection string.
        core.clients.write().await.remove("local");
        let client = core.client("local").await.unwrap();
        assert_eq!(client.kind(), crate::db::DatabaseKind::Sqlite);

        let report = core.health().await;
        assert!(report.checks.contains_key("connection/local"));

        // Disconnect removes the live client and the registration.
        core.disconnect("local").await.unwrap();
        assert!(core.client("local").await.is_err());
        assert!(matches!(
            core.disconnect("local").await.unwrap_err(),
            Error::Database(crate::error::DbError::UnknownConnection(_))
        ));

        core.shutdown(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn command_patterns_are_seeded_at_startup() {
        let (core, _dir) = core_fixture().await;
        assert!(core.vector.len().await >= COMMAND_PATTERNS.len());
        core.shutdown(Duration::from_millis(500)).await;
    }
}
