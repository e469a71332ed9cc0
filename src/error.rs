//! Error types for AI-Shell.

use std::time::Duration;

/// Top-level error type for the shell runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    #[error("Vector store error: {0}")]
    Vector(#[from] VectorError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Enrichment error: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable classification of failures, independent of which component raised
/// them. The CLI maps these to its exit-code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Unavailable,
    NotFound,
    DuplicateName,
    SchemaViolation,
    CryptoError,
    KeystoreUnavailable,
    InvalidInput,
    PermissionDenied,
    RiskRejected,
    ProviderError,
    DimensionMismatch,
    PoolExhausted,
    Internal,
}

impl ErrorKind {
    /// Process exit code for the CLI surface.
    ///
    /// 0 success, 1 general error, 2 invalid arguments, 3 connection error,
    /// 4 query error, 5 permission denied, 6 cancelled by user.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::InvalidInput => 2,
            Self::Unavailable | Self::PoolExhausted | Self::KeystoreUnavailable => 3,
            Self::Timeout | Self::SchemaViolation | Self::DimensionMismatch => 4,
            Self::PermissionDenied => 5,
            Self::RiskRejected => 6,
            _ => 1,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Credential vault errors.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Credential already exists: {0}")]
    DuplicateName(String),

    #[error("Schema violation for credential {name}: {reason}")]
    SchemaViolation { name: String, reason: String },

    #[error("Crypto failure for credential {name}: {reason}")]
    Crypto { name: String, reason: String },

    #[error("Credential {0} is quarantined after a decryption failure")]
    Quarantined(String),

    #[error("Keystore unavailable: {0}")]
    KeystoreUnavailable(String),

    #[error("Vault persistence failed: {0}")]
    Persistence(String),
}

/// Database client and pool errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Invalid connection string: {0}")]
    InvalidDsn(String),

    #[error("Connection to {kind} failed: {reason}")]
    ConnectFailed { kind: String, reason: String },

    #[error("Acquire timed out after {0:?}")]
    AcquireTimeout(Duration),

    #[error("Statement timed out after {0:?}")]
    StatementTimeout(Duration),

    #[error("Pool exhausted: all {size} connections in use")]
    PoolExhausted { size: usize },

    #[error("No healthy connection available after {attempts} validation attempts")]
    Unavailable { attempts: u32 },

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Connection is broken: {0}")]
    Broken(String),

    #[error("Unsupported parameter for {kind}: {reason}")]
    UnsupportedParam { kind: String, reason: String },

    #[error("Connection {0} not registered")]
    UnknownConnection(String),
}

/// Risk analyzer errors.
#[derive(Debug, thiserror::Error)]
pub enum RiskError {
    #[error("Empty statement")]
    EmptyStatement,

    #[error("Statement rejected: {0}")]
    Rejected(String),
}

/// Vector store errors.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Snapshot load failed: {0}")]
    SnapshotLoad(String),

    #[error("Snapshot write failed: {0}")]
    SnapshotWrite(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} does not support {function}")]
    Unsupported { provider: String, function: String },

    #[error("Missing API key: environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Event bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Critical publish timed out after {0:?} at the high-water mark")]
    Backpressure(Duration),

    #[error("Bus is shut down")]
    Closed,
}

/// Enrichment pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("Pipeline is not running")]
    NotRunning,

    #[error("Gatherer {name} failed: {reason}")]
    Gatherer { name: String, reason: String },
}

/// Orchestrator errors (module registry, lifecycle).
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Module already registered: {0}")]
    DuplicateModule(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Startup of {module} failed: {reason}")]
    StartupFailed { module: String, reason: String },

    #[error("Shutdown deadline of {0:?} exceeded; remaining modules aborted")]
    ShutdownTimeout(Duration),
}

impl Error {
    /// Classify this error into the stable failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::InvalidInput,
            Self::Vault(err) => match err {
                VaultError::NotFound(_) => ErrorKind::NotFound,
                VaultError::DuplicateName(_) => ErrorKind::DuplicateName,
                VaultError::SchemaViolation { .. } => ErrorKind::SchemaViolation,
                VaultError::Crypto { .. } | VaultError::Quarantined(_) => ErrorKind::CryptoError,
                VaultError::KeystoreUnavailable(_) => ErrorKind::KeystoreUnavailable,
                VaultError::Persistence(_) => ErrorKind::Internal,
            },
            Self::Database(err) => match err {
                DbError::InvalidDsn(_) | DbError::UnsupportedParam { .. } => {
                    ErrorKind::InvalidInput
                }
                DbError::AcquireTimeout(_) | DbError::StatementTimeout(_) => ErrorKind::Timeout,
                DbError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
                DbError::Unavailable { .. } | DbError::ConnectFailed { .. } => {
                    ErrorKind::Unavailable
                }
                DbError::UnknownConnection(_) => ErrorKind::NotFound,
                DbError::Query(_) | DbError::Broken(_) => ErrorKind::Internal,
            },
            Self::Risk(err) => match err {
                RiskError::EmptyStatement => ErrorKind::InvalidInput,
                RiskError::Rejected(_) => ErrorKind::RiskRejected,
            },
            Self::Vector(err) => match err {
                VectorError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
                _ => ErrorKind::Internal,
            },
            Self::Llm(err) => match err {
                LlmError::Timeout { .. } => ErrorKind::Timeout,
                LlmError::MissingApiKey(_) => ErrorKind::InvalidInput,
                _ => ErrorKind::ProviderError,
            },
            Self::Bus(err) => match err {
                BusError::Backpressure(_) => ErrorKind::Timeout,
                BusError::Closed => ErrorKind::Unavailable,
            },
            Self::Enrichment(_) => ErrorKind::Internal,
            Self::Orchestrator(err) => match err {
                OrchestratorError::DuplicateModule(_) => ErrorKind::DuplicateName,
                OrchestratorError::ModuleNotFound(_) => ErrorKind::NotFound,
                OrchestratorError::StartupFailed { .. } => ErrorKind::Unavailable,
                OrchestratorError::ShutdownTimeout(_) => ErrorKind::Timeout,
            },
            Self::Io(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                ErrorKind::PermissionDenied
            }
            Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Process exit code for this error, per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Statement-level driver failures are query errors (4), even
            // though the taxonomy files them as internal.
            Self::Database(DbError::Query(_)) | Self::Database(DbError::Broken(_)) => 4,
            _ => self.kind().exit_code(),
        }
    }
}

/// Result type alias for the shell.
pub type Result<T> = std::result::Result<T, Error>;
