//! Background enrichment pipeline.
//!
//! A single consumer drains an internal priority queue of user-input
//! snapshots, classifies intent, fans out to bounded context gatherers, and
//! publishes `panel.update` events. The keystroke producer is never blocked:
//! submission is a try-put that overwrites the least-urgent entry on
//! overflow. Stale or superseded requests are skipped without output, and a
//! request that is superseded mid-flight is dropped before publish.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, watch};
use uuid::Uuid;

use crate::config::EnrichmentConfig;
use crate::db::{ClientRegistry, DatabaseClient};
use crate::events::{Event, EventBus, PRIORITY_PANEL};
use crate::history::History;
use crate::llm::{IntentContext, IntentKind, LlmManager};
use crate::vault::Vault;
use crate::vector::VectorStore;

/// Immutable snapshot of user input submitted for enrichment.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentRequest {
    pub id: Uuid,
    /// Session scope for supersession: a later request in the same session
    /// makes earlier ones stale.
    pub session: Uuid,
    pub user_input: String,
    pub cwd: PathBuf,
    pub current_module: String,
    pub submitted_at: DateTime<Utc>,
    /// Lower is more urgent.
    pub priority: u8,
}

impl EnrichmentRequest {
    pub fn new(session: Uuid, user_input: impl Into<String>, cwd: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            user_input: user_input.into(),
            cwd,
            current_module: "shell".to_string(),
            submitted_at: Utc::now(),
            priority: 5,
        }
    }
}

struct QueuedRequest {
    request: EnrichmentRequest,
    seq: u64,
}

/// Bounded priority queue with try-put overwrite semantics. Ordering is by
/// priority, FIFO within a priority.
pub struct EnrichmentQueue {
    entries: Mutex<Vec<QueuedRequest>>,
    capacity: usize,
    next_seq: AtomicU64,
    /// Latest sequence observed per session; anything older is superseded.
    watermark: Mutex<HashMap<Uuid, u64>>,
    notify: Notify,
}

impl EnrichmentQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            next_seq: AtomicU64::new(1),
            watermark: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    /// Non-blocking put. On overflow the oldest entry of the lowest urgency
    /// is overwritten. Returns the sequence assigned to the request.
    pub fn try_put(&self, request: EnrichmentRequest) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        {
            let mut watermark = self.watermark.lock().expect("watermark poisoned");
            let entry = watermark.entry(request.session).or_insert(0);
            *entry = (*entry).max(seq);
        }
        {
            let mut entries = self.entries.lock().expect("queue poisoned");
            if entries.len() >= self.capacity {
                // Least urgent = numerically highest priority; oldest first.
                if let Some(victim) = entries
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, q)| (q.request.priority, std::cmp::Reverse(q.seq)))
                    .map(|(i, _)| i)
                {
                    entries.swap_remove(victim);
                }
            }
            entries.push(QueuedRequest { request, seq });
        }
        self.notify.notify_one();
        seq
    }

    fn try_pop(&self) -> Option<QueuedRequest> {
        let mut entries = self.entries.lock().expect("queue poisoned");
        let best = entries
            .iter()
            .enumerate()
            .min_by_key(|(_, q)| (q.request.priority, q.seq))
            .map(|(i, _)| i)?;
        Some(entries.remove(best))
    }

    /// Wait until an entry is available.
    pub async fn pop_wait(&self) -> QueuedRequest {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Whether a newer request in the same session has been observed.
    pub fn is_superseded(&self, session: Uuid, seq: u64) -> bool {
        self.watermark
            .lock()
            .expect("watermark poisoned")
            .get(&session)
            .is_some_and(|latest| *latest > seq)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handles the gatherers work against.
#[derive(Clone)]
pub struct EnrichmentContext {
    pub llm: Arc<LlmManager>,
    pub vector: Arc<VectorStore>,
    pub vault: Option<Arc<Vault>>,
    pub history: Option<Arc<History>>,
    pub clients: ClientRegistry,
}

/// The pipeline. One consumer task per instance.
pub struct EnrichmentPipeline {
    config: EnrichmentConfig,
    queue: Arc<EnrichmentQueue>,
    bus: Arc<EventBus>,
    ctx: EnrichmentContext,
    pub skipped_count: AtomicU64,
    pub processed_count: AtomicU64,
    stop_tx: watch::Sender<bool>,
}

impl EnrichmentPipeline {
    pub fn new(config: EnrichmentConfig, bus: Arc<EventBus>, ctx: EnrichmentContext) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            queue: Arc::new(EnrichmentQueue::new(config.queue_capacity)),
            config,
            bus,
            ctx,
            skipped_count: AtomicU64::new(0),
            processed_count: AtomicU64::new(0),
            stop_tx,
        })
    }

    /// Submit a snapshot; never blocks the caller.
    pub fn submit(&self, request: EnrichmentRequest) -> u64 {
        self.queue.try_put(request)
    }

    pub fn queue(&self) -> Arc<EnrichmentQueue> {
        self.queue.clone()
    }

    /// Spawn the consumer task.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.run().await })
    }

    /// Signal the consumer to stop after the current request.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    async fn run(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            let queued = tokio::select! {
                _ = stop_rx.changed() => return,
                queued = self.queue.pop_wait() => queued,
            };
            self.process(queued).await;
        }
    }

    async fn process(&self, queued: QueuedRequest) {
        let request = &queued.request;
        let age = (Utc::now() - request.submitted_at)
            .to_std()
            .unwrap_or_default();

        if age > self.config.staleness_window
            || self.queue.is_superseded(request.session, queued.seq)
        {
            self.skipped_count.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(id = %request.id, "skipped stale enrichment request");
            return;
        }

        let context = IntentContext {
            cwd: request.cwd.display().to_string(),
            current_module: request.current_module.clone(),
            recent_history: self
                .ctx
                .history
                .as_ref()
                .map(|h| h.recent(5).iter().map(|r| r.sql_redacted.clone()).collect())
                .unwrap_or_default(),
        };
        let intent = self.ctx.llm.analyze_intent(&request.user_input, &context).await;

        // A newer snapshot may have arrived while intent analysis ran.
        if self.queue.is_superseded(request.session, queued.seq) {
            self.skipped_count.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let sections = self.gather(request, intent.primary_intent).await;

        // Drop the event, not just the work, if superseded meanwhile.
        if self.queue.is_superseded(request.session, queued.seq) {
            self.skipped_count.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let payload = serde_json::json!({
            "request_id": request.id,
            "input": request.user_input,
            "intent": intent.primary_intent.as_str(),
            "confidence": intent.confidence,
            "suggested_commands": intent.suggested_commands,
            "sections": sections,
        });
        let _ = self
            .bus
            .publish(Event::new("panel.update", payload, PRIORITY_PANEL));
        self.processed_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Run the gatherer fan-out for an intent, each under its own deadline.
    /// Timeouts and failures drop that section only.
    async fn gather(
        &self,
        request: &EnrichmentRequest,
        intent: IntentKind,
    ) -> serde_json::Value {
        let deadline = self.config.gatherer_deadline;
        let mut sections = serde_json::Map::new();

        match intent {
            IntentKind::FileOperation => {
                let (listing, usage) = tokio::join!(
                    bounded(deadline, cwd_listing(request.cwd.clone())),
                    bounded(deadline, disk_usage(request.cwd.clone())),
                );
                insert(&mut sections, "cwd_listing", listing);
                insert(&mut sections, "disk_usage", usage);
            }
            IntentKind::DatabaseQuery => {
                let (connections, tables, history) = tokio::join!(
                    bounded(deadline, connection_summary(self.ctx.clients.clone())),
                    bounded(
                        deadline,
                        table_candidates(
                            self.ctx.llm.clone(),
                            self.ctx.vector.clone(),
                            request.user_input.clone(),
                        ),
                    ),
                    bounded(deadline, history_tail(self.ctx.history.clone())),
                );
                insert(&mut sections, "connections", connections);
                insert(&mut sections, "tables", tables);
                insert(&mut sections, "history", history);
            }
            IntentKind::VaultAccess => {
                let names = bounded(deadline, vault_names(self.ctx.vault.clone())).await;
                insert(&mut sections, "credentials", names);
            }
            IntentKind::Navigation | IntentKind::Other => {
                let snapshot = bounded(
                    deadline,
                    system_snapshot(request.cwd.clone(), self.ctx.clients.clone()),
                )
                .await;
                insert(&mut sections, "system", snapshot);
            }
        }

        serde_json::Value::Object(sections)
    }
}

fn insert(
    sections: &mut serde_json::Map<String, serde_json::Value>,
    name: &str,
    value: Option<serde_json::Value>,
) {
    if let Some(value) = value {
        sections.insert(name.to_string(), value);
    }
}

/// Race a gatherer against its deadline; partial results are acceptable.
async fn bounded<F>(deadline: Duration, fut: F) -> Option<serde_json::Value>
where
    F: std::future::Future<Output = Option<serde_json::Value>>,
{
    tokio::time::timeout(deadline, fut).await.ok().flatten()
}

const LISTING_LIMIT: usize = 20;

async fn cwd_listing(cwd: PathBuf) -> Option<serde_json::Value> {
    tokio::task::spawn_blocking(move || {
        let mut names: Vec<String> = std::fs::read_dir(&cwd)
            .ok()?
            .flatten()
            .take(LISTING_LIMIT)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Some(serde_json::json!(names))
    })
    .await
    .ok()
    .flatten()
}

/// Bounded probe: entry count plus the byte total of the first entries.
async fn disk_usage(cwd: PathBuf) -> Option<serde_json::Value> {
    tokio::task::spawn_blocking(move || {
        let mut entries = 0usize;
        let mut bytes = 0u64;
        for entry in std::fs::read_dir(&cwd).ok()?.flatten().take(LISTING_LIMIT) {
            entries += 1;
            if let Ok(meta) = entry.metadata()
                && meta.is_file()
            {
                bytes += meta.len();
            }
        }
        Some(serde_json::json!({ "entries": entries, "sampled_bytes": bytes }))
    })
    .await
    .ok()
    .flatten()
}

async fn connection_summary(clients: ClientRegistry) -> Option<serde_json::Value> {
    let clients = clients.read().await;
    let summary: Vec<serde_json::Value> = clients
        .iter()
        .map(|(name, client)| {
            let metrics = client.pool().metrics();
            serde_json::json!({
                "name": name,
                "kind": client.kind().as_str(),
                "in_use": metrics.in_use,
                "idle": metrics.idle,
            })
        })
        .collect();
    Some(serde_json::json!({
        "active": clients.len(),
        "pools": summary,
    }))
}

async fn table_candidates(
    llm: Arc<LlmManager>,
    vector: Arc<VectorStore>,
    input: String,
) -> Option<serde_json::Value> {
    if vector.is_empty().await {
        return None;
    }
    let token = input.split_whitespace().last().unwrap_or(&input).to_string();
    let embedding = llm.embed(&token).await;
    let hits = vector.search_catalog(&embedding, 5).await.ok()?;
    Some(serde_json::json!(
        hits.iter()
            .map(|h| serde_json::json!({
                "name": h.object.name(),
                "similarity": (h.similarity * 1000.0).round() / 1000.0,
            }))
            .collect::<Vec<_>>()
    ))
}

async fn history_tail(history: Option<Arc<History>>) -> Option<serde_json::Value> {
    let history = history?;
    let recent: Vec<String> = history
        .recent(5)
        .iter()
        .map(|r| r.sql_redacted.clone())
        .collect();
    Some(serde_json::json!(recent))
}

/// Credential names only; never values.
async fn vault_names(vault: Option<Arc<Vault>>) -> Option<serde_json::Value> {
    let vault = vault?;
    Some(serde_json::json!(vault.names()))
}

async fn system_snapshot(cwd: PathBuf, clients: ClientRegistry) -> Option<serde_json::Value> {
    let connections = clients.read().await.len();
    Some(serde_json::json!({
        "cwd": cwd.display().to_string(),
        "os": std::env::consts::OS,
        "connections": connections,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventBusConfig, LlmConfig, LlmFunctionConfig};
    use crate::config::LlmBackend;

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

    fn pipeline_fixture(staleness_ms: u64) -> (Arc<EnrichmentPipeline>, Arc<EventBus>) {
        let bus = EventBus::new(EventBusConfig {
            high_water_mark: 64,
            critical_publish_deadline: Duration::from_millis(100),
        });
        let ctx = EnrichmentContext {
            llm: llm(),
            vector: Arc::new(VectorStore::new(16)),
            vault: None,
            history: None,
            clients: crate::db::new_registry(),
        };
        let pipeline = EnrichmentPipeline::new(
            EnrichmentConfig {
                staleness_window: Duration::from_millis(staleness_ms),
                gatherer_deadline: Duration::from_millis(250),
                queue_capacity: 8,
            },
            bus.clone(),
            ctx,
        );
        (pipeline, bus)
    }

    fn request(session: Uuid, input: &str) -> EnrichmentRequest {
        EnrichmentRequest::new(session, input, std::env::temp_dir())
    }

    #[tokio::test]
    async fn fresh_request_produces_panel_update() {
        let (pipeline, bus) = pipeline_fixture(1_000);
        let mut rx = bus.subscribe_channel("panel.update").await;
        let bus_task = bus.start();
        let pipe_task = pipeline.start();

        pipeline.submit(request(Uuid::new_v4(), "show users"));

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("panel.update within deadline")
            .unwrap();
        assert_eq!(event.priority, PRIORITY_PANEL);
        assert_eq!(event.payload["intent"], "database_query");

        pipeline.stop();
        bus.close();
        let _ = pipe_task.await;
        let _ = bus_task.await;
    }

    #[tokio::test]
    async fn stale_request_is_skipped_without_output() {
        let (pipeline, bus) = pipeline_fixture(50);
        let mut rx = bus.subscribe_channel("panel.update").await;
        let bus_task = bus.start();

        let mut stale = request(Uuid::new_v4(), "ls");
        stale.submitted_at = Utc::now() - chrono::Duration::milliseconds(500);
        pipeline.submit(stale);

        let pipe_task = pipeline.start();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(pipeline.skipped_count.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err(), "no panel.update for a stale request");

        pipeline.stop();
        bus.close();
        let _ = pipe_task.await;
        let _ = bus_task.await;
    }

    #[tokio::test]
    async fn newer_request_supersedes_older_in_same_session() {
        let (pipeline, bus) = pipeline_fixture(60_000);
        let mut rx = bus.subscribe_channel("panel.update").await;
        let bus_task = bus.start();

        // Both enqueued before the consumer starts; the first is superseded
        // by the second even though neither exceeds the staleness window.
        let session = Uuid::new_v4();
        pipeline.submit(request(session, "ls"));
        pipeline.submit(request(session, "show users"));

        let pipe_task = pipeline.start();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("second request publishes")
            .unwrap();
        assert_eq!(event.payload["input"], "show users");
        assert_eq!(pipeline.skipped_count.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err(), "first request produced nothing");

        pipeline.stop();
        bus.close();
        let _ = pipe_task.await;
        let _ = bus_task.await;
    }

    #[tokio::test]
    async fn requests_in_other_sessions_are_untouched() {
        let (pipeline, _bus) = pipeline_fixture(60_000);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let seq_a = pipeline.submit(request(a, "one"));
        let _seq_b = pipeline.submit(request(b, "two"));
        assert!(!pipeline.queue().is_superseded(a, seq_a));
    }

    #[tokio::test]
    async fn overflow_overwrites_least_urgent_oldest() {
        let queue = EnrichmentQueue::new(2);
        let session = Uuid::new_v4();

        let mut low_old = request(session, "low old");
        low_old.priority = 9;
        let mut urgent = request(session, "urgent");
        urgent.priority = 1;
        let mut incoming = request(session, "incoming");
        incoming.priority = 5;

        queue.try_put(low_old);
        queue.try_put(urgent);
        queue.try_put(incoming);

        assert_eq!(queue.len(), 2);
        let first = queue.pop_wait().await;
        assert_eq!(first.request.user_input, "urgent");
        let second = queue.pop_wait().await;
        assert_eq!(second.request.user_input, "incoming");
    }

    #[tokio::test]
    async fn queue_orders_by_priority_then_fifo() {
        let queue = EnrichmentQueue::new(8);
        // Distinct sessions so supersession does not interfere with order.
        let mut a = request(Uuid::new_v4(), "a");
        a.priority = 5;
        let mut b = request(Uuid::new_v4(), "b");
        b.priority = 5;
        let mut c = request(Uuid::new_v4(), "c");
        c.priority = 1;

        queue.try_put(a);
        queue.try_put(b);
        queue.try_put(c);

        assert_eq!(queue.pop_wait().await.request.user_input, "c");
        assert_eq!(queue.pop_wait().await.request.user_input, "a");
        assert_eq!(queue.pop_wait().await.request.user_input, "b");
    }
}
