//! Intent classification types and the rule-based fallback classifier.
//!
//! The fallback keeps the shell functional with no provider configured:
//! keyword tables over the first word plus a few structural cues. The
//! contract only promises `confidence` in [0, 1] and a valid primary intent.

use serde::{Deserialize, Serialize};

use super::anonymize::AnonymisationMap;

/// Primary intent of a user input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    FileOperation,
    DatabaseQuery,
    Navigation,
    VaultAccess,
    Other,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileOperation => "file_operation",
            Self::DatabaseQuery => "database_query",
            Self::Navigation => "navigation",
            Self::VaultAccess => "vault_access",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file_operation" => Some(Self::FileOperation),
            "database_query" => Some(Self::DatabaseQuery),
            "navigation" => Some(Self::Navigation),
            "vault_access" => Some(Self::VaultAccess),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Structured context handed to intent analysis.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntentContext {
    pub cwd: String,
    pub current_module: String,
    pub recent_history: Vec<String>,
}

/// Result of intent analysis.
#[derive(Debug, Clone, Serialize)]
pub struct IntentResult {
    pub primary_intent: IntentKind,
    /// Always clamped to [0, 1].
    pub confidence: f64,
    pub suggested_commands: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymisation_map: Option<AnonymisationMap>,
}

impl IntentResult {
    pub fn other() -> Self {
        Self {
            primary_intent: IntentKind::Other,
            confidence: 0.0,
            suggested_commands: Vec::new(),
            anonymisation_map: None,
        }
    }
}

const SQL_VERBS: &[&str] = &[
    "select", "insert", "update", "delete", "create", "drop", "alter", "truncate", "explain",
    "show", "describe", "with", "grant", "revoke",
];

const FILE_COMMANDS: &[&str] = &[
    "ls", "ll", "cat", "cp", "mv", "rm", "mkdir", "rmdir", "touch", "df", "du", "find", "head",
    "tail", "stat", "chmod", "chown",
];

const NAVIGATION_COMMANDS: &[&str] = &["cd", "pwd", "pushd", "popd"];

/// Rule-based intent classification. Empty input is `other` with zero
/// confidence.
pub fn classify(input: &str) -> IntentResult {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return IntentResult::other();
    }

    let lowered = trimmed.to_lowercase();
    let first = lowered.split_whitespace().next().unwrap_or_default();

    if lowered.contains("$vault.") || first == "vault" {
        return IntentResult {
            primary_intent: IntentKind::VaultAccess,
            confidence: 0.9,
            suggested_commands: vec!["vault list".into(), "vault get".into()],
            anonymisation_map: None,
        };
    }

    if SQL_VERBS.contains(&first) {
        return IntentResult {
            primary_intent: IntentKind::DatabaseQuery,
            confidence: 0.9,
            suggested_commands: vec!["explain".into(), "query".into()],
            anonymisation_map: None,
        };
    }

    if NAVIGATION_COMMANDS.contains(&first) {
        return IntentResult {
            primary_intent: IntentKind::Navigation,
            confidence: 0.8,
            suggested_commands: Vec::new(),
            anonymisation_map: None,
        };
    }

    if FILE_COMMANDS.contains(&first) {
        return IntentResult {
            primary_intent: IntentKind::FileOperation,
            confidence: 0.8,
            suggested_commands: Vec::new(),
            anonymisation_map: None,
        };
    }

    // JSON-looking input against a Mongo connection reads as a query.
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return IntentResult {
            primary_intent: IntentKind::DatabaseQuery,
            confidence: 0.6,
            suggested_commands: vec!["query".into()],
            anonymisation_map: None,
        };
    }

    IntentResult {
        primary_intent: IntentKind::Other,
        confidence: 0.3,
        suggested_commands: Vec::new(),
        anonymisation_map: None,
    }
}
