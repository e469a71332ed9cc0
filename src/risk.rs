//! Static risk scoring for SQL statements.
//!
//! Statements are parsed (never regexed) and classified by a first-match
//! rule table:
//!
//! 1. `DROP TABLE|DATABASE|SCHEMA`, `TRUNCATE`      -> CRITICAL
//! 2. `DELETE`/`UPDATE` without `WHERE`             -> HIGH
//! 3. `DELETE`/`UPDATE` with `WHERE`, `INSERT`,
//!    `CREATE`, `ALTER`                             -> MEDIUM
//! 4. `SELECT`, `EXPLAIN`, `SHOW`                   -> LOW
//!
//! Multi-statement input takes the maximum level across statements. Dialect
//! statements the parser rejects are scored from the token stream, so
//! `SHOW`-style and driver-native commands still classify. The analyzer
//! never executes anything.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{ObjectType, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::RiskError;

/// Risk level assigned to a statement before execution.
///
/// Part of the analyzer's public contract; the execution gate keys its
/// confirmation flow off this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Analysis output.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub operations: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows_estimate: Option<u64>,
}

/// Stateless SQL risk analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskAnalyzer;

impl RiskAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Score a statement (or `;`-separated statements).
    pub fn analyze(&self, sql: &str) -> Result<RiskAssessment, RiskError> {
        self.analyze_with_estimate(sql, None)
    }

    /// Score with an affected-row estimate a client cheaply provided.
    /// The estimate annotates the result; it never changes the level.
    pub fn analyze_with_estimate(
        &self,
        sql: &str,
        affected_rows_estimate: Option<u64>,
    ) -> Result<RiskAssessment, RiskError> {
        if sql.trim().is_empty() {
            return Err(RiskError::EmptyStatement);
        }

        let dialect = GenericDialect {};
        let verdicts = match Parser::parse_sql(&dialect, sql) {
            Ok(statements) if !statements.is_empty() => statements
                .iter()
                .map(classify_statement)
                .collect::<Vec<Verdict>>(),
            _ => classify_from_tokens(sql),
        };

        if verdicts.is_empty() {
            return Err(RiskError::EmptyStatement);
        }

        let mut level = RiskLevel::Low;
        let mut operations = Vec::new();
        let mut warnings = Vec::new();
        for verdict in verdicts {
            level = level.max(verdict.level);
            if !operations.contains(&verdict.operation) {
                operations.push(verdict.operation);
            }
            if let Some(warning) = verdict.warning
                && !warnings.contains(&warning)
            {
                warnings.push(warning);
            }
        }

        Ok(RiskAssessment {
            level,
            operations,
            warnings,
            affected_rows_estimate,
        })
    }
}

struct Verdict {
    level: RiskLevel,
    operation: String,
    warning: Option<String>,
}

impl Verdict {
    fn new(level: RiskLevel, operation: impl Into<String>) -> Self {
        Self {
            level,
            operation: operation.into(),
            warning: None,
        }
    }

    fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

fn classify_statement(statement: &Statement) -> Verdict {
    match statement {
        Statement::Drop { object_type, .. } => match object_type {
            ObjectType::Table | ObjectType::Database | ObjectType::Schema => {
                Verdict::new(RiskLevel::Critical, "DROP")
                    .warn(format!("DROP {object_type} causes permanent data loss"))
            }
            _ => Verdict::new(RiskLevel::Medium, "DROP"),
        },
        Statement::Truncate { .. } => Verdict::new(RiskLevel::Critical, "TRUNCATE")
            .warn("TRUNCATE causes permanent data loss"),
        Statement::Delete(delete) => {
            if delete.selection.is_none() {
                Verdict::new(RiskLevel::High, "DELETE")
                    .warn("DELETE with no WHERE clause affects every row")
            } else {
                Verdict::new(RiskLevel::Medium, "DELETE")
            }
        }
        Statement::Update(update) => {
            if update.selection.is_none() {
                Verdict::new(RiskLevel::High, "UPDATE")
                    .warn("UPDATE with no WHERE clause affects every row")
            } else {
                Verdict::new(RiskLevel::Medium, "UPDATE")
            }
        }
        Statement::Insert(_) => Verdict::new(RiskLevel::Medium, "INSERT"),
        Statement::Query(_) => Verdict::new(RiskLevel::Low, "SELECT"),
        other => {
            // Everything else (CREATE, ALTER, SHOW, EXPLAIN, SET, ...)
            // scores from its leading keyword, same table as the token
            // fallback.
            let rendered = other.to_string();
            let keyword = rendered
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();
            classify_keyword(&keyword, true)
        }
    }
}

/// Tokenizer fallback for statements the parser rejects.
fn classify_from_tokens(sql: &str) -> Vec<Verdict> {
    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, sql).tokenize().unwrap_or_default();

    // Split on top-level semicolons and score each chunk independently.
    let mut chunks: Vec<Vec<&Token>> = Vec::new();
    let mut current: Vec<&Token> = Vec::new();
    for token in &tokens {
        if matches!(token, Token::SemiColon) {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    let mut verdicts = Vec::new();
    for chunk in chunks {
        let mut first_word: Option<String> = None;
        let mut has_where = false;
        for token in chunk {
            if let Token::Word(word) = token {
                if first_word.is_none() {
                    first_word = Some(word.value.to_ascii_uppercase());
                }
                if word.keyword == Keyword::WHERE {
                    has_where = true;
                }
            }
        }
        if let Some(keyword) = first_word {
            verdicts.push(classify_keyword(&keyword, has_where));
        }
    }

    if verdicts.is_empty() {
        // Tokenizer produced nothing word-like; fall back to the first
        // whitespace-delimited word of the raw text.
        if let Some(first) = sql.split_whitespace().next() {
            verdicts.push(classify_keyword(&first.to_ascii_uppercase(), false));
        }
    }
    verdicts
}

fn classify_keyword(keyword: &str, has_where: bool) -> Verdict {
    match keyword {
        "DROP" => Verdict::new(RiskLevel::Critical, "DROP")
            .warn("DROP causes permanent data loss"),
        "TRUNCATE" => Verdict::new(RiskLevel::Critical, "TRUNCATE")
            .warn("TRUNCATE causes permanent data loss"),
        "DELETE" if !has_where => Verdict::new(RiskLevel::High, "DELETE")
            .warn("DELETE with no WHERE clause affects every row"),
        "UPDATE" if !has_where => Verdict::new(RiskLevel::High, "UPDATE")
            .warn("UPDATE with no WHERE clause affects every row"),
        "DELETE" => Verdict::new(RiskLevel::Medium, "DELETE"),
        "UPDATE" => Verdict::new(RiskLevel::Medium, "UPDATE"),
        "INSERT" | "REPLACE" | "MERGE" | "UPSERT" => Verdict::new(RiskLevel::Medium, keyword),
        "CREATE" => Verdict::new(RiskLevel::Medium, "CREATE"),
        "ALTER" => Verdict::new(RiskLevel::Medium, "ALTER"),
        "SELECT" | "EXPLAIN" | "SHOW" | "DESCRIBE" | "DESC" | "WITH" | "VALUES" => {
            Verdict::new(RiskLevel::Low, keyword)
        }
        // Driver-native read commands (Redis, Mongo shells).
        "GET" | "MGET" | "KEYS" | "SCAN" | "INFO" | "PING" | "TTL" | "EXISTS" | "FIND"
        | "AGGREGATE" | "COUNT" => Verdict::new(RiskLevel::Low, keyword),
        // Unknown verbs are assumed to write.
        other => Verdict::new(RiskLevel::Medium, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn analyze(sql: &str) -> RiskAssessment {
        RiskAnalyzer::new().analyze(sql).unwrap()
    }

    #[test]
    fn drop_table_is_critical_with_data_loss_warning() {
        let a = analyze("DROP TABLE users");
        assert_eq!(a.level, RiskLevel::Critical);
        assert_eq!(a.operations, vec!["DROP".to_string()]);
        assert!(a.warnings.iter().any(|w| w.contains("permanent data loss")));
    }

    #[test]
    fn truncate_is_critical() {
        let a = analyze("TRUNCATE TABLE audit_log");
        assert_eq!(a.level, RiskLevel::Critical);
        assert!(a.warnings.iter().any(|w| w.contains("permanent data loss")));
    }

    #[test]
    fn delete_without_where_is_high() {
        let a = analyze("DELETE FROM users");
        assert_eq!(a.level, RiskLevel::High);
        assert!(a.warnings.iter().any(|w| w.contains("no WHERE clause")));
    }

    #[test]
    fn update_without_where_is_high() {
        let a = analyze("UPDATE users SET active = false");
        assert_eq!(a.level, RiskLevel::High);
        assert!(a.warnings.iter().any(|w| w.contains("no WHERE clause")));
    }

    #[test]
    fn delete_with_where_is_medium() {
        let a = analyze("DELETE FROM users WHERE id = 42");
        assert_eq!(a.level, RiskLevel::Medium);
        assert!(a.warnings.is_empty());
    }

    #[test]
    fn update_with_where_is_medium() {
        let a = analyze("UPDATE users SET active = false WHERE id = 42");
        assert_eq!(a.level, RiskLevel::Medium);
    }

    #[test]
    fn insert_create_alter_are_medium() {
        assert_eq!(analyze("INSERT INTO t (a) VALUES (1)").level, RiskLevel::Medium);
        assert_eq!(analyze("CREATE TABLE t (id INT)").level, RiskLevel::Medium);
        assert_eq!(
            analyze("ALTER TABLE t ADD COLUMN b TEXT").level,
            RiskLevel::Medium
        );
    }

    #[test]
    fn reads_are_low() {
        assert_eq!(analyze("SELECT * FROM users").level, RiskLevel::Low);
        assert_eq!(analyze("EXPLAIN SELECT 1").level, RiskLevel::Low);
        assert_eq!(analyze("SHOW TABLES").level, RiskLevel::Low);
    }

    #[test]
    fn multi_statement_takes_the_maximum() {
        let a = analyze("SELECT 1; DELETE FROM t; DROP TABLE t");
        assert_eq!(a.level, RiskLevel::Critical);
        assert!(a.operations.contains(&"SELECT".to_string()));
        assert!(a.operations.contains(&"DELETE".to_string()));
        assert!(a.operations.contains(&"DROP".to_string()));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            RiskAnalyzer::new().analyze("   ").unwrap_err(),
            RiskError::EmptyStatement
        ));
    }

    #[test]
    fn drop_view_is_not_critical() {
        assert_eq!(analyze("DROP VIEW v").level, RiskLevel::Medium);
    }

    #[test]
    fn where_in_subquery_still_counts_for_the_outer_delete() {
        // Parsed path: the outer DELETE carries a selection.
        let a = analyze("DELETE FROM t WHERE id IN (SELECT id FROM old)");
        assert_eq!(a.level, RiskLevel::Medium);
    }

    #[test]
    fn unknown_verbs_default_to_medium() {
        assert_eq!(analyze("FLUSHALL").level, RiskLevel::Medium);
    }

    #[test]
    fn driver_native_reads_are_low() {
        assert_eq!(analyze("GET session:42").level, RiskLevel::Low);
    }

    #[test]
    fn estimate_is_attached_without_changing_level() {
        let a = RiskAnalyzer::new()
            .analyze_with_estimate("DELETE FROM t WHERE id = 1", Some(1))
            .unwrap();
        assert_eq!(a.level, RiskLevel::Medium);
        assert_eq!(a.affected_rows_estimate, Some(1));
    }

    #[test]
    fn levels_order_for_gating() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert_eq!(RiskLevel::High.to_string(), "HIGH");
    }
}
