//! CLI surface: subcommands, global flags, exit-code mapping.
//!
//! Exit codes: 0 success, 1 general error, 2 invalid arguments,
//! 3 connection error, 4 query error, 5 permission denied, 6 cancelled.

mod backup;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::config::{Config, OutputFormat};
use crate::core::CoreOrchestrator;
use crate::db::{DatabaseClient, DatabaseKind, Param};
use crate::error::{Error, Result};
use crate::gate::ExecutionOptions;
use crate::output;
use crate::repl;
use crate::vault::{CredentialType, EnvKeystore, FileKeystore, Keystore};

/// AI-augmented database shell.
#[derive(Debug, Parser)]
#[command(name = "ai-shell", version, about = "AI-augmented database shell")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Output format: text, json, table, csv.
    #[arg(long, global = true, env = "AI_SHELL_OUTPUT_FORMAT")]
    pub format: Option<String>,

    /// Write output to a file instead of stdout.
    #[arg(long, global = true)]
    pub output: Option<PathBuf>,

    /// Verbose logging (equivalent to AI_SHELL_LOG_LEVEL=debug).
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Analyze and gate, but do not execute.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Affirm HIGH-risk statements.
    #[arg(long, global = true)]
    pub confirm: bool,

    /// Acknowledge CRITICAL statements.
    #[arg(long, global = true)]
    pub force: bool,

    /// Per-operation timeout in milliseconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Register and open a connection.
    Connect { name: String, dsn: String },
    /// Close and remove a connection.
    Disconnect { name: String },
    /// Set the active connection for later invocations.
    Use { name: String },
    /// List registered connections.
    Connections,
    /// Execute a statement on the active (or named) connection.
    Query {
        sql: String,
        /// Positional parameters; repeat per value.
        #[arg(long = "param")]
        params: Vec<String>,
        /// Run on a specific connection instead of the active one.
        #[arg(long)]
        on: Option<String>,
    },
    /// Show the execution plan for a statement.
    Explain {
        sql: String,
        #[arg(long)]
        on: Option<String>,
    },
    /// Ask the configured LLM for optimization suggestions.
    Optimize {
        sql: String,
    },
    /// Recent statements above the latency threshold.
    SlowQueries {
        #[arg(long, default_value_t = 500)]
        threshold_ms: u64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Index maintenance.
    Indexes {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Local state backups.
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
    /// Credential vault operations.
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },
    /// Component and connection health.
    Health,
    /// Runtime counters and pool metrics.
    Status,
}

#[derive(Debug, Clone, Subcommand)]
pub enum IndexAction {
    List {
        #[arg(long)]
        on: Option<String>,
    },
    Create {
        table: String,
        name: String,
        /// Comma-separated column list.
        columns: String,
        #[arg(long)]
        on: Option<String>,
    },
    Drop {
        name: String,
        #[arg(long)]
        on: Option<String>,
    },
    Analyze {
        table: String,
        #[arg(long)]
        on: Option<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum BackupAction {
    Create,
    List,
    Restore { id: String },
    Verify { id: String },
}

#[derive(Debug, Clone, Subcommand)]
pub enum VaultAction {
    Add {
        name: String,
        value: String,
        /// Credential type: standard, database, user-defined.
        #[arg(long, default_value = "standard")]
        r#type: String,
    },
    Get {
        name: String,
        /// Return a stable opaque token instead of the plaintext.
        #[arg(long)]
        anonymise: bool,
    },
    List,
    Remove { name: String },
    Rotate { name: String },
}

/// Cross-invocation CLI state.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CliState {
    active_connection: Option<String>,
}

impl CliState {
    fn path(config: &Config) -> PathBuf {
        config.state_dir.join("state.json")
    }

    fn load(config: &Config) -> Self {
        std::fs::read_to_string(Self::path(config))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save(&self, config: &Config) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        crate::bootstrap::write_private(&Self::path(config), raw.as_bytes()).map_err(Error::Io)
    }
}

/// Pick the keystore backend: the env var named by the entry when set
/// (headless runs), the state-dir file entry otherwise.
fn select_keystore(config: &Config) -> Box<dyn Keystore> {
    let entry = config.vault.keystore_entry.clone();
    if std::env::var(&entry).map(|v| !v.trim().is_empty()).unwrap_or(false) {
        Box::new(EnvKeystore::new(entry))
    } else {
        Box::new(FileKeystore::new(&config.state_dir, entry))
    }
}

/// Run the CLI; returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    match run_inner(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            if matches!(e.kind(), crate::error::ErrorKind::KeystoreUnavailable) {
                eprintln!(
                    "hint: provision the keystore entry (a file under ~/.ai-shell/keystore/ or \
                     an environment variable named by AI_SHELL_VAULT_KEY) before first use"
                );
            }
            e.exit_code()
        }
    }
}

async fn run_inner(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(raw) = &cli.format {
        config.output_format = OutputFormat::parse(raw, "--format").map_err(Error::Config)?;
    }
    if let Some(timeout) = cli.timeout {
        config.database.acquire_timeout = Duration::from_millis(timeout);
        config.database.statement_timeout = Duration::from_millis(timeout);
    }
    let format = config.output_format;

    let keystore = select_keystore(&config);
    let core = CoreOrchestrator::start(config, keystore.as_ref()).await?;

    let result = match cli.command.clone() {
        None => repl::run(core.clone(), format).await,
        Some(command) => {
            let rendered = execute_command(&core, command, &cli).await;
            match rendered {
                Ok(text) => {
                    emit(&text, &cli.output)?;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
    };

    core.shutdown(Duration::from_secs(5)).await;
    result
}

fn emit(text: &str, target: &Option<PathBuf>) -> Result<()> {
    match target {
        Some(path) => std::fs::write(path, text).map_err(Error::Io),
        None => {
            if !text.is_empty() {
                println!("{text}");
            }
            Ok(())
        }
    }
}

async fn execute_command(
    core: &Arc<CoreOrchestrator>,
    command: Command,
    cli: &Cli,
) -> Result<String> {
    let format = core.config.output_format;
    let options = ExecutionOptions {
        confirmed: cli.confirm,
        force: cli.force,
        dry_run: cli.dry_run,
    };

    match command {
        Command::Connect { name, dsn } => {
            core.connect(&name, &dsn).await?;
            let mut state = CliState::load(&core.config);
            state.active_connection = Some(name.clone());
            state.save(&core.config)?;
            Ok(format!("connected '{name}'"))
        }
        Command::Disconnect { name } => {
            core.disconnect(&name).await?;
            let mut state = CliState::load(&core.config);
            if state.active_connection.as_deref() == Some(name.as_str()) {
                state.active_connection = None;
                state.save(&core.config)?;
            }
            Ok(format!("disconnected '{name}'"))
        }
        Command::Use { name } => {
            core.client(&name).await?;
            let mut state = CliState::load(&core.config);
            state.active_connection = Some(name.clone());
            state.save(&core.config)?;
            Ok(format!("using '{name}'"))
        }
        Command::Connections => {
            let names = core.connection_names().await;
            let active = CliState::load(&core.config).active_connection;
            let value = serde_json::json!({
                "active": active,
                "connections": names,
            });
            Ok(output::render_value(&value, format))
        }
        Command::Query { sql, params, on } => {
            let connection = resolve_connection(core, on)?;
            run_gated(core, &connection, &sql, &repl::parse_params(&params), options, format).await
        }
        Command::Explain { sql, on } => {
            let connection = resolve_connection(core, on)?;
            let client = core.client(&connection).await?;
            let explain_sql = match client.kind() {
                DatabaseKind::Sqlite => format!("EXPLAIN QUERY PLAN {sql}"),
                DatabaseKind::MongoDb | DatabaseKind::Redis => {
                    return Err(Error::Database(crate::error::DbError::UnsupportedParam {
                        kind: client.kind().as_str().into(),
                        reason: "EXPLAIN applies to SQL connections".into(),
                    }));
                }
                _ => format!("EXPLAIN {sql}"),
            };
            run_gated(core, &connection, &explain_sql, &[], options, format).await
        }
        Command::Optimize { sql } => {
            let assessment = core.gate.analyzer().analyze(&sql)?;
            let suggestion = core
                .llm
                .explain_error(&sql, "user asked for optimization suggestions")
                .await
                .unwrap_or_else(|| {
                    "no optimization provider configured; statement analysis only".to_string()
                });
            let value = serde_json::json!({
                "risk": assessment,
                "suggestion": suggestion,
            });
            Ok(output::render_value(&value, format))
        }
        Command::SlowQueries { threshold_ms, limit } => {
            let slow = core.history.slow_queries(threshold_ms, limit);
            let value = serde_json::to_value(&slow)
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
            Ok(output::render_value(&value, format))
        }
        Command::Indexes { action } => run_index_action(core, action, options, format).await,
        Command::Backup { action } => match action {
            BackupAction::Create => {
                let id = backup::create(&core.config.state_dir)?;
                Ok(format!("backup '{id}' created"))
            }
            BackupAction::List => {
                let ids = backup::list(&core.config.state_dir)?;
                Ok(output::render_value(&serde_json::json!(ids), format))
            }
            BackupAction::Restore { id } => {
                if !cli.confirm {
                    return Err(Error::Risk(crate::error::RiskError::Rejected(
                        "restore overwrites current state; rerun with --confirm".into(),
                    )));
                }
                let files = backup::restore(&core.config.state_dir, &id)?;
                Ok(format!("restored {} file(s) from '{id}'", files.len()))
            }
            BackupAction::Verify { id } => {
                let files = backup::verify(&core.config.state_dir, &id)?;
                Ok(format!("backup '{id}' verified ({} file(s))", files.len()))
            }
        },
        Command::Vault { action } => run_vault_action(core, action, format),
        Command::Health => {
            let report = core.health().await;
            let value = serde_json::to_value(&report)
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
            Ok(output::render_value(&value, format))
        }
        Command::Status => {
            let mut pools = serde_json::Map::new();
            for (name, client) in core.clients.read().await.iter() {
                pools.insert(
                    name.clone(),
                    serde_json::to_value(client.pool().metrics()).unwrap_or_default(),
                );
            }
            use std::sync::atomic::Ordering;
            let value = serde_json::json!({
                "bus": {
                    "published": core.bus.counters.published.load(Ordering::Relaxed),
                    "delivered": core.bus.counters.delivered.load(Ordering::Relaxed),
                    "dropped": core.bus.counters.dropped.load(Ordering::Relaxed),
                },
                "vector_objects": core.vector.len().await,
                "history_entries": core.history.len(),
                "pools": pools,
            });
            Ok(output::render_value(&value, format))
        }
    }
}

fn resolve_connection(core: &Arc<CoreOrchestrator>, on: Option<String>) -> Result<String> {
    if let Some(name) = on {
        return Ok(name);
    }
    CliState::load(&core.config)
        .active_connection
        .ok_or_else(|| {
            Error::Config(crate::error::ConfigError::MissingRequired {
                key: "active connection".into(),
                hint: "run `ai-shell use <name>` or pass --on <name>".into(),
            })
        })
}

async fn run_gated(
    core: &Arc<CoreOrchestrator>,
    connection: &str,
    sql: &str,
    params: &[Param],
    options: ExecutionOptions,
    format: OutputFormat,
) -> Result<String> {
    let client = core.client(connection).await?;
    let outcome = core
        .gate
        .execute(connection, client.as_ref(), sql, params, options)
        .await?;

    if outcome.dry_run {
        let value = serde_json::json!({
            "dry_run": true,
            "risk": outcome.assessment,
        });
        return Ok(output::render_value(&value, format));
    }
    if let Some(error) = outcome.error() {
        let mut message = format!("query failed: {error}");
        if let Some(explanation) = &outcome.explanation {
            message.push_str(&format!("\n{explanation}"));
        }
        // Query errors map to exit code 4 through the timeout class.
        return Err(Error::Database(crate::error::DbError::Query(message)));
    }
    match outcome.output {
        Some(rows) => Ok(output::render_query_output(&rows, format)),
        None => Ok(String::new()),
    }
}

async fn run_index_action(
    core: &Arc<CoreOrchestrator>,
    action: IndexAction,
    options: ExecutionOptions,
    format: OutputFormat,
) -> Result<String> {
    match action {
        IndexAction::List { on } => {
            let connection = resolve_connection(core, on)?;
            let client = core.client(&connection).await?;
            let sql = match client.kind() {
                DatabaseKind::Postgres => {
                    "SELECT indexname, tablename FROM pg_indexes \
                     WHERE schemaname NOT IN ('pg_catalog', 'information_schema')"
                }
                DatabaseKind::MySql => {
                    "SELECT DISTINCT index_name, table_name FROM information_schema.statistics \
                     WHERE table_schema NOT IN ('mysql', 'sys', 'performance_schema')"
                }
                DatabaseKind::Sqlite => {
                    "SELECT name, tbl_name FROM sqlite_master WHERE type = 'index'"
                }
                other => {
                    return Err(Error::Database(crate::error::DbError::UnsupportedParam {
                        kind: other.as_str().into(),
                        reason: "index listing applies to SQL connections".into(),
                    }));
                }
            };
            run_gated(core, &connection, sql, &[], options, format).await
        }
        IndexAction::Create {
            table,
            name,
            columns,
            on,
        } => {
            let connection = resolve_connection(core, on)?;
            validate_identifier(&table)?;
            validate_identifier(&name)?;
            let column_list: Vec<&str> = columns.split(',').map(str::trim).collect();
            for column in &column_list {
                validate_identifier(column)?;
            }
            let sql = format!("CREATE INDEX {name} ON {table} ({})", column_list.join(", "));
            run_gated(core, &connection, &sql, &[], options, format).await
        }
        IndexAction::Drop { name, on } => {
            let connection = resolve_connection(core, on)?;
            validate_identifier(&name)?;
            let sql = format!("DROP INDEX {name}");
            run_gated(core, &connection, &sql, &[], options, format).await
        }
        IndexAction::Analyze { table, on } => {
            let connection = resolve_connection(core, on)?;
            validate_identifier(&table)?;
            let client = core.client(&connection).await?;
            let sql = match client.kind() {
                DatabaseKind::MySql => format!("ANALYZE TABLE {table}"),
                _ => format!("ANALYZE {table}"),
            };
            run_gated(core, &connection, &sql, &[], options, format).await
        }
    }
}

/// Identifiers interpolated into DDL must be plain names; values still go
/// through positional parameters.
fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(crate::error::ConfigError::InvalidValue {
            key: "identifier".into(),
            message: format!("'{name}' is not a plain identifier"),
        }))
    }
}

fn run_vault_action(
    core: &Arc<CoreOrchestrator>,
    action: VaultAction,
    format: OutputFormat,
) -> Result<String> {
    match action {
        VaultAction::Add { name, value, r#type } => {
            let credential_type = match r#type.as_str() {
                "standard" => CredentialType::Standard,
                "database" => CredentialType::Database,
                "user-defined" => CredentialType::UserDefined,
                other => {
                    return Err(Error::Config(crate::error::ConfigError::InvalidValue {
                        key: "--type".into(),
                        message: format!(
                            "expected 'standard', 'database', or 'user-defined', got '{other}'"
                        ),
                    }));
                }
            };
            core.vault.store(&name, &value, credential_type, None)?;
            Ok(format!("stored '{name}'"))
        }
        VaultAction::Get { name, anonymise } => {
            let value = core.vault.retrieve(&name, anonymise)?;
            Ok(secrecy::ExposeSecret::expose_secret(&value).to_string())
        }
        VaultAction::List => {
            let infos = core.vault.list();
            let value = serde_json::to_value(&infos)
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
            Ok(output::render_value(&value, format))
        }
        VaultAction::Remove { name } => {
            core.vault.delete(&name)?;
            Ok(format!("removed '{name}'"))
        }
        VaultAction::Rotate { name } => {
            core.vault.rotate(&name)?;
            Ok(format!("rotated '{name}'"))
        }
    }
}
