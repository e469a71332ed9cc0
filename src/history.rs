//! Query-history log.
//!
//! Append-only JSONL in the state directory, owner-only. Records are
//! immutable once written and always carry redacted SQL; the execution gate
//! is the only writer. A bounded in-memory tail serves enrichment context
//! and `slow-queries` without rereading the file.

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bootstrap;
use crate::risk::RiskLevel;

/// One executed statement. `sql_redacted` has been through vault
/// auto-redaction before this struct is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub sql_redacted: String,
    /// Connection name the statement ran on.
    pub connection: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub row_count: u64,
    pub risk_level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// In-memory tail size.
const RECENT_CAPACITY: usize = 256;

/// The history log.
pub struct History {
    path: PathBuf,
    recent: Mutex<VecDeque<QueryRecord>>,
}

impl History {
    /// Open the log, loading the tail of an existing file.
    pub fn open(path: PathBuf) -> std::io::Result<Self> {
        let mut recent = VecDeque::with_capacity(RECENT_CAPACITY);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            for line in raw.lines() {
                if let Ok(record) = serde_json::from_str::<QueryRecord>(line) {
                    if recent.len() == RECENT_CAPACITY {
                        recent.pop_front();
                    }
                    recent.push_back(record);
                }
            }
        }
        Ok(Self {
            path,
            recent: Mutex::new(recent),
        })
    }

    /// Append one record.
    pub fn append(&self, record: QueryRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(&record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if !self.path.exists() {
            bootstrap::write_private(&self.path, &[])?;
        }
        let mut file = std::fs::OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        let mut recent = self.recent.lock().expect("history tail poisoned");
        if recent.len() == RECENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(record);
        Ok(())
    }

    /// The newest `n` records, newest first.
    pub fn recent(&self, n: usize) -> Vec<QueryRecord> {
        let recent = self.recent.lock().expect("history tail poisoned");
        recent.iter().rev().take(n).cloned().collect()
    }

    /// Successful statements slower than `threshold_ms`, slowest first.
    pub fn slow_queries(&self, threshold_ms: u64, limit: usize) -> Vec<QueryRecord> {
        let recent = self.recent.lock().expect("history tail poisoned");
        let mut slow: Vec<QueryRecord> = recent
            .iter()
            .filter(|r| r.error.is_none() && r.duration_ms >= threshold_ms)
            .cloned()
            .collect();
        slow.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
        slow.truncate(limit);
        slow
    }

    pub fn len(&self) -> usize {
        self.recent.lock().expect("history tail poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(sql: &str, duration_ms: u64) -> QueryRecord {
        QueryRecord {
            sql_redacted: sql.to_string(),
            connection: "test".to_string(),
            started_at: Utc::now(),
            duration_ms,
            row_count: 1,
            risk_level: RiskLevel::Low,
            error: None,
        }
    }

    #[test]
    fn append_and_recent_are_newest_first() {
        let dir = tempdir().unwrap();
        let history = History::open(dir.path().join("history.jsonl")).unwrap();

        history.append(record("SELECT 1", 5)).unwrap();
        history.append(record("SELECT 2", 5)).unwrap();

        let recent = history.recent(5);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sql_redacted, "SELECT 2");
    }

    #[test]
    fn reopen_restores_tail_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        {
            let history = History::open(path.clone()).unwrap();
            history.append(record("SELECT 1", 5)).unwrap();
        }
        let history = History::open(path).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.recent(1)[0].sql_redacted, "SELECT 1");
    }

    #[test]
    fn slow_queries_filter_and_sort() {
        let dir = tempdir().unwrap();
        let history = History::open(dir.path().join("history.jsonl")).unwrap();
        history.append(record("fast", 10)).unwrap();
        history.append(record("slow", 900)).unwrap();
        history.append(record("slower", 2000)).unwrap();
        let mut failed = record("failed", 5000);
        failed.error = Some("boom".into());
        history.append(failed).unwrap();

        let slow = history.slow_queries(500, 10);
        assert_eq!(slow.len(), 2);
        assert_eq!(slow[0].sql_redacted, "slower");
        assert_eq!(slow[1].sql_redacted, "slow");
    }

    #[cfg(unix)]
    #[test]
    fn history_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let history = History::open(path.clone()).unwrap();
        history.append(record("SELECT 1", 1)).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
