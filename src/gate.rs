//! Risk-gated SQL execution.
//!
//! The single entry point for user-typed SQL. Sequence: risk check,
//! confirmation for HIGH (explicit force token for CRITICAL), pooled
//! execution, redacted history record, completion/failure events. Other
//! components may run catalog or health queries directly; they never come
//! through here.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use crate::db::{DatabaseClient, Param, QueryOutput};
use crate::error::{Error, RiskError};
use crate::events::{Event, EventBus};
use crate::history::{History, QueryRecord};
use crate::llm::LlmManager;
use crate::risk::{RiskAnalyzer, RiskAssessment, RiskLevel};
use crate::vault::Vault;

/// Caller-supplied execution flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionOptions {
    /// Affirmative response for HIGH-risk statements (`--confirm`).
    pub confirmed: bool,
    /// Explicit acknowledgment token for CRITICAL statements (`--force`).
    pub force: bool,
    /// Analyze and gate, but never send to the driver.
    pub dry_run: bool,
}

/// Result of one gated execution.
#[derive(Debug, Serialize)]
pub struct ExecutionOutcome {
    pub assessment: RiskAssessment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<QueryOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<QueryRecord>,
    /// Best-effort LLM explanation of a driver error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub dry_run: bool,
}

impl ExecutionOutcome {
    /// Driver-level failure, if any.
    pub fn error(&self) -> Option<&str> {
        self.record.as_ref().and_then(|r| r.error.as_deref())
    }
}

/// The gate.
pub struct SqlGate {
    analyzer: RiskAnalyzer,
    vault: Arc<Vault>,
    history: Arc<History>,
    llm: Arc<LlmManager>,
    bus: Arc<EventBus>,
}

impl SqlGate {
    pub fn new(
        vault: Arc<Vault>,
        history: Arc<History>,
        llm: Arc<LlmManager>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            analyzer: RiskAnalyzer::new(),
            vault,
            history,
            llm,
            bus,
        }
    }

    pub fn analyzer(&self) -> &RiskAnalyzer {
        &self.analyzer
    }

    /// Execute user SQL through the full gate sequence.
    ///
    /// Returns `Err` when the statement never reaches the driver (risk
    /// rejection, empty statement, acquire failure). Driver failures return
    /// `Ok` with the error captured in the record, mirroring the history.
    pub async fn execute(
        &self,
        connection_name: &str,
        client: &dyn DatabaseClient,
        sql: &str,
        params: &[Param],
        options: ExecutionOptions,
    ) -> Result<ExecutionOutcome, Error> {
        let assessment = self.analyzer.analyze(sql)?;

        if assessment.level >= RiskLevel::High {
            self.request_confirmation(connection_name, sql, &assessment)
                .await;
            let authorized = match assessment.level {
                RiskLevel::Critical => options.force,
                _ => options.confirmed || options.force,
            };
            if !authorized {
                let needed = if assessment.level == RiskLevel::Critical {
                    "--force"
                } else {
                    "--confirm"
                };
                return Err(Error::Risk(RiskError::Rejected(format!(
                    "{} statement requires {}: {}",
                    assessment.level,
                    needed,
                    assessment.warnings.join("; ")
                ))));
            }
        }

        if options.dry_run {
            return Ok(ExecutionOutcome {
                assessment,
                output: None,
                record: None,
                explanation: None,
                dry_run: true,
            });
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let result = client.execute(sql, params).await;
        let duration_ms = clock.elapsed().as_millis() as u64;
        let sql_redacted = self.vault.auto_redact(sql);

        match result {
            Ok(output) => {
                let record = QueryRecord {
                    sql_redacted,
                    connection: connection_name.to_string(),
                    started_at,
                    duration_ms,
                    row_count: output.row_count(),
                    risk_level: assessment.level,
                    error: None,
                };
                if let Err(e) = self.history.append(record.clone()) {
                    tracing::warn!(error = %e, "failed to append query history");
                }
                let _ = self.bus.publish(Event::new(
                    "query.completed",
                    serde_json::json!({
                        "connection": connection_name,
                        "sql": record.sql_redacted,
                        "duration_ms": duration_ms,
                        "row_count": record.row_count,
                        "risk_level": assessment.level,
                    }),
                    crate::events::PRIORITY_DEFAULT,
                ));
                Ok(ExecutionOutcome {
                    assessment,
                    output: Some(output),
                    record: Some(record),
                    explanation: None,
                    dry_run: false,
                })
            }
            Err(db_error) => {
                // Acquire-level failures never reached the driver with the
                // statement; surface them as hard errors.
                if matches!(
                    db_error,
                    crate::error::DbError::AcquireTimeout(_)
                        | crate::error::DbError::PoolExhausted { .. }
                        | crate::error::DbError::Unavailable { .. }
                ) {
                    return Err(Error::Database(db_error));
                }

                let error_text = db_error.to_string();
                let explanation = self.llm.explain_error(sql, &error_text).await;
                let record = QueryRecord {
                    sql_redacted,
                    connection: connection_name.to_string(),
                    started_at,
                    duration_ms,
                    row_count: 0,
                    risk_level: assessment.level,
                    error: Some(error_text.clone()),
                };
                if let Err(e) = self.history.append(record.clone()) {
                    tracing::warn!(error = %e, "failed to append query history");
                }
                let _ = self.bus.publish(Event::new(
                    "query.failed",
                    serde_json::json!({
                        "connection": connection_name,
                        "sql": record.sql_redacted,
                        "error": error_text,
                        "risk_level": assessment.level,
                    }),
                    crate::events::PRIORITY_DEFAULT,
                ));
                Ok(ExecutionOutcome {
                    assessment,
                    output: None,
                    record: Some(record),
                    explanation,
                    dry_run: false,
                })
            }
        }
    }

    /// Publish `confirmation.required`; critical so interested surfaces see
    /// it before the gate decides.
    async fn request_confirmation(
        &self,
        connection_name: &str,
        sql: &str,
        assessment: &RiskAssessment,
    ) {
        let event = Event::critical(
            "confirmation.required",
            serde_json::json!({
                "connection": connection_name,
                "sql": self.vault.auto_redact(sql),
                "level": assessment.level,
                "warnings": assessment.warnings,
                "operations": assessment.operations,
            }),
            1,
        );
        if let Err(e) = self.bus.publish_critical(event).await {
            tracing::warn!(error = %e, "confirmation event could not be delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DatabaseConfig, EventBusConfig, LlmBackend, LlmConfig, LlmFunctionConfig, VaultConfig,
    };
    use crate::db::{Client, Dsn};
    use crate::vault::{CredentialType, FileKeystore};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Fixture {
        gate: SqlGate,
        client: Client,
        bus: Arc<EventBus>,
        history: Arc<History>,
        vault: Arc<Vault>,
        _dir: tempfile::TempDir,
        bus_task: tokio::task::JoinHandle<()>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();

        let keystore = FileKeystore::new(dir.path(), "master");
        keystore.provision("gate-test-master").unwrap();
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

        let bus = EventBus::new(EventBusConfig {
            high_water_mark: 64,
            critical_publish_deadline: Duration::from_millis(200),
        });
        let bus_task = bus.start();

        let history = Arc::new(History::open(dir.path().join("history.jsonl")).unwrap());

        let function = LlmFunctionConfig {
            backend: LlmBackend::Rules,
            base_url: None,
            model: None,
            api_key_env: None,
        };
        let llm = Arc::new(LlmManager::new(
            LlmConfig {
                deadline_ms: 100,
                max_retries: 0,
                backoff_base_ms: 1,
                embedding_dimension: 16,
                embedding_cache_size: 16,
                intent: function.clone(),
                completion: function.clone(),
                anonymizer: function.clone(),
                embedding: function,
            },
            Some(vault.clone()),
            Some(bus.clone()),
        ));

        let dsn = Dsn::parse(&format!(
            "sqlite://{}",
            dir.path().join("gate.db").display()
        ))
        .unwrap();
        let client = Client::connect(
            &dsn,
            &DatabaseConfig {
                pool_min: 1,
                pool_max: 2,
                acquire_timeout: Duration::from_secs(1),
                validation_window: Duration::from_secs(5),
                max_validation_retries: 3,
                health_sweep_interval: Duration::from_secs(30),
                statement_timeout: Duration::from_secs(30),
            },
            Some(bus.clone()),
        )
        .await
        .unwrap();

        let gate = SqlGate::new(vault.clone(), history.clone(), llm, bus.clone());
        Fixture {
            gate,
            client,
            bus,
            history,
            vault,
            _dir: dir,
            bus_task,
        }
    }

    async fn seed_users(f: &Fixture) {
        f.gate
            .execute(
                "test",
                &f.client,
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
                &[],
                ExecutionOptions {
                    confirmed: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn critical_ddl_is_gated_without_force() {
        let f = fixture().await;
        seed_users(&f).await;
        let mut confirmations = f.bus.subscribe_channel("confirmation.required").await;

        let err = f
            .gate
            .execute(
                "test",
                &f.client,
                "DROP TABLE users",
                &[],
                ExecutionOptions::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 6);
        let event = confirmations.recv().await.unwrap();
        assert_eq!(event.payload["level"], "CRITICAL");
        assert!(
            event.payload["warnings"]
                .as_array()
                .unwrap()
                .iter()
                .any(|w| w.as_str().unwrap().contains("permanent data loss"))
        );

        // Nothing was sent to the driver: the table still exists.
        let out = f
            .client
            .execute("SELECT name FROM sqlite_master WHERE name = 'users'", &[])
            .await
            .unwrap();
        assert_eq!(out.rows.len(), 1);

        f.bus.close();
        let _ = f.bus_task.await;
    }

    #[tokio::test]
    async fn critical_ddl_executes_with_force() {
        let f = fixture().await;
        seed_users(&f).await;

        let outcome = f
            .gate
            .execute(
                "test",
                &f.client,
                "DROP TABLE users",
                &[],
                ExecutionOptions {
                    force: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(outcome.error().is_none());

        let out = f
            .client
            .execute("SELECT name FROM sqlite_master WHERE name = 'users'", &[])
            .await
            .unwrap();
        assert!(out.rows.is_empty());

        f.bus.close();
        let _ = f.bus_task.await;
    }

    #[tokio::test]
    async fn high_risk_delete_requires_and_honours_confirm() {
        let f = fixture().await;
        seed_users(&f).await;
        f.gate
            .execute(
                "test",
                &f.client,
                "INSERT INTO users (id, name) VALUES (1, 'ada')",
                &[],
                ExecutionOptions {
                    confirmed: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Unconfirmed: rejected, exit code 6.
        let err = f
            .gate
            .execute(
                "test",
                &f.client,
                "DELETE FROM users",
                &[],
                ExecutionOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 6);

        // Confirmed: executes and records.
        let outcome = f
            .gate
            .execute(
                "test",
                &f.client,
                "DELETE FROM users",
                &[],
                ExecutionOptions {
                    confirmed: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.assessment.level, RiskLevel::High);
        assert!(
            outcome
                .assessment
                .warnings
                .iter()
                .any(|w| w.contains("no WHERE clause"))
        );
        let record = outcome.record.unwrap();
        assert_eq!(record.sql_redacted, "DELETE FROM users");
        assert!(f.history.len() >= 3);

        f.bus.close();
        let _ = f.bus_task.await;
    }

    #[tokio::test]
    async fn recorded_sql_is_redacted() {
        let f = fixture().await;
        seed_users(&f).await;
        f.vault
            .store("prod_secret", "hunter2", CredentialType::Standard, None)
            .unwrap();

        let outcome = f
            .gate
            .execute(
                "test",
                &f.client,
                "INSERT INTO users (id, name) VALUES (2, 'hunter2')",
                &[],
                ExecutionOptions {
                    confirmed: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let record = outcome.record.unwrap();
        assert!(!record.sql_redacted.contains("hunter2"));
        assert!(record.sql_redacted.contains("***prod_secret***"));

        f.bus.close();
        let _ = f.bus_task.await;
    }

    #[tokio::test]
    async fn driver_failures_record_error_and_publish_failed_event() {
        let f = fixture().await;
        let mut failed = f.bus.subscribe_channel("query.failed").await;

        let outcome = f
            .gate
            .execute(
                "test",
                &f.client,
                "SELECT * FROM missing_table",
                &[],
                ExecutionOptions::default(),
            )
            .await
            .unwrap();

        assert!(outcome.error().is_some());
        let event = tokio::time::timeout(Duration::from_secs(1), failed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.topic, "query.failed");

        f.bus.close();
        let _ = f.bus_task.await;
    }

    #[tokio::test]
    async fn dry_run_analyzes_without_executing() {
        let f = fixture().await;
        seed_users(&f).await;

        let outcome = f
            .gate
            .execute(
                "test",
                &f.client,
                "DROP TABLE users",
                &[],
                ExecutionOptions {
                    force: true,
                    dry_run: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(outcome.dry_run);
        assert!(outcome.output.is_none());

        let out = f
            .client
            .execute("SELECT name FROM sqlite_master WHERE name = 'users'", &[])
            .await
            .unwrap();
        assert_eq!(out.rows.len(), 1, "dry run must not reach the driver");

        f.bus.close();
        let _ = f.bus_task.await;
    }

    #[tokio::test]
    async fn medium_risk_executes_without_confirmation() {
        let f = fixture().await;
        seed_users(&f).await;
        let confirmations = f.bus.counters.published.load(Ordering::Relaxed);

        f.gate
            .execute(
                "test",
                &f.client,
                "INSERT INTO users (id, name) VALUES (9, 'grace')",
                &[],
                ExecutionOptions::default(),
            )
            .await
            .unwrap();

        // Only completion events were published beyond the baseline.
        assert!(f.bus.counters.published.load(Ordering::Relaxed) > confirmations);

        f.bus.close();
        let _ = f.bus_task.await;
    }
}
