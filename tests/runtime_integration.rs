//! Cross-component runtime scenarios: enrichment staleness, anonymisation,
//! event ordering, and completion through the assembled core.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use aishell::config::Config;
use aishell::core::CoreOrchestrator;
use aishell::enrichment::EnrichmentRequest;
use aishell::vault::{CredentialType, FileKeystore};
use uuid::Uuid;

async fn start_core(dir: &std::path::Path) -> Arc<CoreOrchestrator> {
    let keystore = FileKeystore::new(dir, "master");
    keystore.provision("runtime-master-secret").unwrap();

    let mut config = Config::default();
    config.state_dir = dir.to_path_buf();
    config.vault.vault_path = dir.join("vault.json");
    config.vault.kdf_iterations = 100_000;
    config.llm.embedding_dimension = 16;

    CoreOrchestrator::start(config, &keystore).await.unwrap()
}

#[tokio::test]
async fn superseded_enrichment_produces_no_panel_update() {
    use aishell::enrichment::{EnrichmentContext, EnrichmentPipeline};

    let dir = tempfile::tempdir().unwrap();
    let core = start_core(dir.path()).await;
    let mut updates = core.bus.subscribe_channel("panel.update").await;

    // A dedicated pipeline whose consumer starts only after both snapshots
    // are queued, so the supersession is deterministic.
    let pipeline = EnrichmentPipeline::new(
        core.config.enrichment.clone(),
        core.bus.clone(),
        EnrichmentContext {
            llm: core.llm.clone(),
            vector: core.vector.clone(),
            vault: Some(core.vault.clone()),
            history: Some(core.history.clone()),
            clients: core.clients.clone(),
        },
    );

    let session = core.session;
    pipeline.submit(EnrichmentRequest::new(session, "ls", dir.path().to_path_buf()));
    pipeline.submit(EnrichmentRequest::new(
        session,
        "show users",
        dir.path().to_path_buf(),
    ));
    let consumer = pipeline.start();

    let event = tokio::time::timeout(Duration::from_secs(3), updates.recv())
        .await
        .expect("the newer request publishes")
        .unwrap();
    assert_eq!(event.payload["input"], "show users");
    assert_eq!(pipeline.skipped_count.load(Ordering::SeqCst), 1);
    assert!(
        updates.try_recv().is_err(),
        "the superseded request must not publish"
    );

    pipeline.stop();
    let _ = consumer.await;
    core.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn stale_request_older_than_window_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let core = start_core(dir.path()).await;
    let mut updates = core.bus.subscribe_channel("panel.update").await;

    let mut request =
        EnrichmentRequest::new(Uuid::new_v4(), "ls", dir.path().to_path_buf());
    request.submitted_at = chrono::Utc::now() - chrono::Duration::seconds(5);
    core.pipeline.submit(request);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(updates.try_recv().is_err());
    assert!(core.pipeline.skipped_count.load(Ordering::SeqCst) >= 1);

    core.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn anonymisation_round_trip_is_byte_exact() {
    let dir = tempfile::tempdir().unwrap();
    let core = start_core(dir.path()).await;

    core.vault
        .store("pg_prod", "s3cretvalue", CredentialType::Standard, None)
        .unwrap();

    let input = "connect with s3cretvalue as admin@example.com from 192.168.1.10";
    let (anonymised, map) = core.llm.anonymise(input);

    assert!(!anonymised.contains("s3cretvalue"));
    assert!(!anonymised.contains("admin@example.com"));
    assert!(!anonymised.contains("192.168.1.10"));

    let restored = core.llm.deanonymise(&anonymised, &map);
    assert_eq!(restored, input);

    core.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn vector_round_trip_through_the_seeded_store() {
    let dir = tempfile::tempdir().unwrap();
    let core = start_core(dir.path()).await;

    // Command patterns are seeded at startup; searching for an inserted
    // object's own embedding returns it first with similarity ~1.
    let text = "connect connect to a database with a connection string";
    let embedding = core.llm.embed(text).await;
    let hits = core.vector.search(&embedding, 3).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].object.name(), "connect");
    assert!(hits[0].similarity >= 0.99);

    core.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn completer_prefers_vault_keys_over_other_sources() {
    let dir = tempfile::tempdir().unwrap();
    let core = start_core(dir.path()).await;
    core.vault
        .store("db_admin_password", "x", CredentialType::Standard, None)
        .unwrap();

    let buffer = "echo $vault.db_";
    let (start, completions) = core.completer.complete(buffer, buffer.len()).await;
    assert_eq!(start, "echo ".len());
    assert!(!completions.is_empty());
    assert_eq!(completions[0].text, "$vault.db_admin_password");

    core.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn events_drain_by_priority_with_fifo_ties() {
    let dir = tempfile::tempdir().unwrap();
    let core = start_core(dir.path()).await;
    let mut rx = core.bus.subscribe_channel("ordering.test").await;

    // Publish a burst; the dispatcher drains strictly by (priority, fifo).
    core.bus
        .publish(aishell::events::Event::new(
            "ordering.test",
            serde_json::json!({"n": "low-1"}),
            8,
        ))
        .unwrap();
    core.bus
        .publish(aishell::events::Event::new(
            "ordering.test",
            serde_json::json!({"n": "high"}),
            1,
        ))
        .unwrap();
    core.bus
        .publish(aishell::events::Event::new(
            "ordering.test",
            serde_json::json!({"n": "low-2"}),
            8,
        ))
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(event.payload["n"].as_str().unwrap().to_string());
    }
    // The high-priority event overtakes any queued low-priority ones, and
    // the two equal-priority events keep their submission order.
    let high_pos = seen.iter().position(|n| n == "high").unwrap();
    let low1_pos = seen.iter().position(|n| n == "low-1").unwrap();
    let low2_pos = seen.iter().position(|n| n == "low-2").unwrap();
    assert!(low1_pos < low2_pos);
    assert!(high_pos < low2_pos);

    core.shutdown(Duration::from_secs(2)).await;
}
