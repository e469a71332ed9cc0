//! Redis driver.
//!
//! Statements are native commands (`GET session:42`, `HGETALL user:1`).
//! The command word and its arguments are split on whitespace with
//! double-quote grouping; positional parameters append as trailing
//! arguments, never spliced into the text.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use crate::error::DbError;

use super::{CatalogEntry, CatalogKind, DatabaseKind, Driver, DriverConn, Dsn, Param, QueryOutput};

pub struct RedisDriver {
    url: String,
}

impl RedisDriver {
    pub fn new(dsn: &Dsn) -> Self {
        Self {
            url: dsn.expose().to_string(),
        }
    }
}

#[async_trait]
impl Driver for RedisDriver {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Redis
    }

    async fn open(&self) -> Result<Box<dyn DriverConn>, DbError> {
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| DbError::InvalidDsn(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DbError::ConnectFailed {
                kind: "redis".into(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(RedisConn { conn }))
    }
}

struct RedisConn {
    conn: MultiplexedConnection,
}

#[async_trait]
impl DriverConn for RedisConn {
    fn is_open(&self) -> bool {
        true
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        redis::cmd("PING")
            .query_async::<String>(&mut self.conn)
            .await
            .map(|_| ())
            .map_err(|e| DbError::Broken(e.to_string()))
    }

    async fn execute(&mut self, statement: &str, params: &[Param]) -> Result<QueryOutput, DbError> {
        let mut words = split_command(statement);
        if words.is_empty() {
            return Err(DbError::Query("empty redis command".into()));
        }
        let command = words.remove(0).to_ascii_uppercase();
        let mut cmd = redis::cmd(&command);
        for word in &words {
            cmd.arg(word);
        }
        for param in params {
            cmd.arg(param.as_text());
        }

        let value: redis::Value = cmd
            .query_async(&mut self.conn)
            .await
            .map_err(|e| {
                if e.is_connection_dropped() || e.is_io_error() {
                    DbError::Broken(e.to_string())
                } else {
                    DbError::Query(e.to_string())
                }
            })?;

        Ok(value_to_output(&command, value))
    }

    async fn catalog(&mut self) -> Result<Vec<CatalogEntry>, DbError> {
        // Key-value stores carry no schema catalog; expose the keyspace
        // summary as system objects.
        let info: String = redis::cmd("INFO")
            .arg("keyspace")
            .query_async(&mut self.conn)
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(info
            .lines()
            .filter(|line| line.starts_with("db"))
            .filter_map(|line| line.split(':').next())
            .map(|db| {
                CatalogEntry::new(db, CatalogKind::System, DatabaseKind::Redis)
                    .description("redis keyspace")
            })
            .collect())
    }
}

/// Split a command line on whitespace, honouring double-quoted groups.
fn split_command(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in input.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn value_to_json(value: redis::Value) -> serde_json::Value {
    match value {
        redis::Value::Nil => serde_json::Value::Null,
        redis::Value::Int(i) => serde_json::json!(i),
        redis::Value::BulkString(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        redis::Value::SimpleString(s) => serde_json::Value::String(s),
        redis::Value::Okay => serde_json::Value::String("OK".to_string()),
        redis::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(value_to_json).collect())
        }
        other => serde_json::Value::String(format!("{other:?}")),
    }
}

fn value_to_output(command: &str, value: redis::Value) -> QueryOutput {
    match value_to_json(value) {
        serde_json::Value::Array(items) => QueryOutput {
            columns: vec![command.to_ascii_lowercase()],
            rows: items.into_iter().map(|item| vec![item]).collect(),
            rows_affected: 0,
        },
        single => QueryOutput {
            columns: vec![command.to_ascii_lowercase()],
            rows: vec![vec![single]],
            rows_affected: 0,
        },
    }
}
