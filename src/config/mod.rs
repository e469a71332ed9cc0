//! Configuration for AI-Shell.
//!
//! Settings are resolved with priority: env var > config file > default.
//! The config file is TOML at `~/.ai-shell/config.toml` (overridable via
//! `AI_SHELL_CONFIG`). Env overrides: `AI_SHELL_VAULT_KEY`,
//! `AI_SHELL_OUTPUT_FORMAT`, `AI_SHELL_KDF_ITERATIONS`,
//! `AI_SHELL_DB_POOL_MIN`/`AI_SHELL_DB_POOL_MAX`,
//! `AI_SHELL_DB_ACQUIRE_TIMEOUT_MS`, and `AI_SHELL_STALENESS_WINDOW_MS`.
//! Only non-secret settings live here; API keys are resolved through env
//! vars named by `api_key_env` fields, and credentials live in the vault.

pub(crate) mod helpers;
mod llm;

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::bootstrap;
use crate::error::ConfigError;

pub use self::llm::{LlmBackend, LlmConfig, LlmFunctionConfig};

/// Main configuration for the shell runtime.
#[derive(Debug, Clone)]
pub struct Config {
    /// State directory holding vault, history, snapshots, config.
    pub state_dir: PathBuf,
    pub vault: VaultConfig,
    pub database: DatabaseConfig,
    pub events: EventBusConfig,
    pub enrichment: EnrichmentConfig,
    pub completer: CompleterConfig,
    pub llm: LlmConfig,
    pub output_format: OutputFormat,
}

/// Credential vault settings.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// PBKDF2-SHA256 iteration count. Floor-checked at 100 000.
    pub kdf_iterations: u32,
    /// Keystore entry name the master secret is derived from.
    pub keystore_entry: String,
    pub vault_path: PathBuf,
}

/// Database client and pool settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub pool_min: usize,
    pub pool_max: usize,
    pub acquire_timeout: Duration,
    /// A validation older than this triggers a fresh liveness round-trip.
    pub validation_window: Duration,
    pub max_validation_retries: u32,
    pub health_sweep_interval: Duration,
    pub statement_timeout: Duration,
}

/// Event bus settings.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub high_water_mark: usize,
    pub critical_publish_deadline: Duration,
}

/// Enrichment pipeline settings.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub staleness_window: Duration,
    pub gatherer_deadline: Duration,
    pub queue_capacity: usize,
}

/// Intelligent completer settings.
#[derive(Debug, Clone)]
pub struct CompleterConfig {
    pub deadline: Duration,
    pub max_results: usize,
}

/// Output rendering format for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
    Csv,
}

impl OutputFormat {
    pub fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match helpers::normalize_variant(value).as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            "csv" => Ok(Self::Csv),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'text', 'json', 'table', or 'csv', got '{value}'"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// File layer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
struct VaultFile {
    kdf_iterations: Option<u32>,
    keystore_entry: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DatabaseFile {
    pool_min: Option<usize>,
    pool_max: Option<usize>,
    acquire_timeout_ms: Option<u64>,
    validation_window_ms: Option<u64>,
    max_validation_retries: Option<u32>,
    health_sweep_interval_ms: Option<u64>,
    statement_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EventsFile {
    high_water_mark: Option<usize>,
    critical_publish_deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EnrichmentFile {
    staleness_window_ms: Option<u64>,
    gatherer_deadline_ms: Option<u64>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CompleterFile {
    deadline_ms: Option<u64>,
    max_results: Option<usize>,
}

/// On-disk config file shape. Every field optional; defaults fill the gaps.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    vault: VaultFile,
    #[serde(default)]
    database: DatabaseFile,
    #[serde(default)]
    events: EventsFile,
    #[serde(default)]
    enrichment: EnrichmentFile,
    #[serde(default)]
    completer: CompleterFile,
    #[serde(default)]
    llm: llm::LlmFile,
    output_format: Option<String>,
}

impl ConfigFile {
    fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl Config {
    /// Load and resolve the full configuration.
    pub fn load() -> Result<Self, ConfigError> {
        let path = bootstrap::config_path();
        let file = ConfigFile::load(&path)?;
        Self::resolve(&file, bootstrap::state_dir())
    }

    /// Resolve a parsed config file against env overrides and defaults.
    fn resolve(file: &ConfigFile, state_dir: PathBuf) -> Result<Self, ConfigError> {
        let keystore_entry = helpers::optional_env("AI_SHELL_VAULT_KEY")?
            .or_else(|| file.vault.keystore_entry.clone())
            .unwrap_or_else(|| "ai-shell-master".to_string());

        let kdf_iterations = helpers::optional_env_parse::<u32>("AI_SHELL_KDF_ITERATIONS")?
            .or(file.vault.kdf_iterations)
            .unwrap_or(200_000);
        if kdf_iterations < 100_000 {
            return Err(ConfigError::InvalidValue {
                key: "vault.kdf_iterations".to_string(),
                message: format!("must be at least 100000, got {kdf_iterations}"),
            });
        }

        let output_format = match helpers::optional_env("AI_SHELL_OUTPUT_FORMAT")? {
            Some(raw) => OutputFormat::parse(&raw, "AI_SHELL_OUTPUT_FORMAT")?,
            None => match &file.output_format {
                Some(raw) => OutputFormat::parse(raw, "output_format")?,
                None => OutputFormat::default(),
            },
        };

        let db = &file.database;
        let pool_min = helpers::optional_env_parse::<usize>("AI_SHELL_DB_POOL_MIN")?
            .or(db.pool_min)
            .unwrap_or(2);
        let pool_max = helpers::optional_env_parse::<usize>("AI_SHELL_DB_POOL_MAX")?
            .or(db.pool_max)
            .unwrap_or(10);
        if pool_min > pool_max || pool_max == 0 {
            return Err(ConfigError::InvalidValue {
                key: "database.pool_min".to_string(),
                message: format!("pool bounds invalid: min={pool_min}, max={pool_max}"),
            });
        }

        Ok(Self {
            vault: VaultConfig {
                kdf_iterations,
                keystore_entry,
                vault_path: state_dir.join("vault.json"),
            },
            database: DatabaseConfig {
                pool_min,
                pool_max,
                acquire_timeout: Duration::from_millis(
                    helpers::optional_env_parse::<u64>("AI_SHELL_DB_ACQUIRE_TIMEOUT_MS")?
                        .or(db.acquire_timeout_ms)
                        .unwrap_or(5_000),
                ),
                validation_window: Duration::from_millis(db.validation_window_ms.unwrap_or(5_000)),
                max_validation_retries: db.max_validation_retries.unwrap_or(3),
                health_sweep_interval: Duration::from_millis(
                    db.health_sweep_interval_ms.unwrap_or(30_000),
                ),
                statement_timeout: Duration::from_millis(db.statement_timeout_ms.unwrap_or(30_000)),
            },
            events: EventBusConfig {
                high_water_mark: file.events.high_water_mark.unwrap_or(1_024),
                critical_publish_deadline: Duration::from_millis(
                    file.events.critical_publish_deadline_ms.unwrap_or(1_000),
                ),
            },
            enrichment: EnrichmentConfig {
                staleness_window: Duration::from_millis(
                    helpers::optional_env_parse::<u64>("AI_SHELL_STALENESS_WINDOW_MS")?
                        .or(file.enrichment.staleness_window_ms)
                        .unwrap_or(1_000),
                ),
                gatherer_deadline: Duration::from_millis(
                    file.enrichment.gatherer_deadline_ms.unwrap_or(250),
                ),
                queue_capacity: file.enrichment.queue_capacity.unwrap_or(32),
            },
            completer: CompleterConfig {
                deadline: Duration::from_millis(file.completer.deadline_ms.unwrap_or(50)),
                max_results: file.completer.max_results.unwrap_or(16),
            },
            llm: LlmConfig::resolve(&file.llm)?,
            output_format,
            state_dir,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::resolve(&ConfigFile::default(), bootstrap::state_dir())
            .expect("default config must resolve")
    }
}
