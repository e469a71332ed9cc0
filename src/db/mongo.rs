//! MongoDB driver.
//!
//! Statements are driver-native command documents in JSON
//! (e.g. `{"find": "users", "filter": {"active": true}}`), run against the
//! DSN's database (`admin` when none is given). Positional parameters do not
//! apply; the command document carries its own values.

use async_trait::async_trait;
use mongodb::bson::{Document, doc};

use crate::error::DbError;

use super::{CatalogEntry, CatalogKind, DatabaseKind, Driver, DriverConn, Dsn, Param, QueryOutput};

pub struct MongoDriver {
    uri: String,
    database: String,
}

impl MongoDriver {
    pub fn new(dsn: &Dsn) -> Self {
        Self {
            uri: dsn.expose().to_string(),
            database: dsn.database.clone().unwrap_or_else(|| "admin".to_string()),
        }
    }
}

#[async_trait]
impl Driver for MongoDriver {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::MongoDb
    }

    async fn open(&self) -> Result<Box<dyn DriverConn>, DbError> {
        let client = mongodb::Client::with_uri_str(&self.uri)
            .await
            .map_err(|e| DbError::ConnectFailed {
                kind: "mongodb".into(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(MongoConn {
            client,
            database: self.database.clone(),
        }))
    }
}

struct MongoConn {
    client: mongodb::Client,
    database: String,
}

#[async_trait]
impl DriverConn for MongoConn {
    fn is_open(&self) -> bool {
        // The Rust driver manages transport internally; rely on ping.
        true
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        self.client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| DbError::Broken(e.to_string()))
    }

    async fn execute(&mut self, statement: &str, params: &[Param]) -> Result<QueryOutput, DbError> {
        if !params.is_empty() {
            return Err(DbError::UnsupportedParam {
                kind: "mongodb".into(),
                reason: "command documents carry their own values".into(),
            });
        }
        let json: serde_json::Value = serde_json::from_str(statement).map_err(|e| {
            DbError::Query(format!("statement must be a JSON command document: {e}"))
        })?;
        let command: Document = mongodb::bson::to_document(&json)
            .map_err(|e| DbError::Query(format!("invalid command document: {e}")))?;

        let response = self
            .client
            .database(&self.database)
            .run_command(command)
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(response_to_output(&response))
    }

    async fn catalog(&mut self) -> Result<Vec<CatalogEntry>, DbError> {
        let db = self.client.database(&self.database);
        let collections = db
            .list_collection_names()
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(collections
            .into_iter()
            .map(|name| {
                CatalogEntry::new(name, CatalogKind::Table, DatabaseKind::MongoDb)
                    .owner(self.database.clone())
            })
            .collect())
    }
}

/// Flatten a command response. Cursor replies become one row per document;
/// anything else is a single-row `result` column.
fn response_to_output(response: &Document) -> QueryOutput {
    let as_json = serde_json::to_value(response).unwrap_or(serde_json::Value::Null);

    if let Some(batch) = as_json
        .pointer("/cursor/firstBatch")
        .and_then(|b| b.as_array())
    {
        return QueryOutput {
            columns: vec!["document".to_string()],
            rows: batch.iter().map(|doc| vec![doc.clone()]).collect(),
            rows_affected: 0,
        };
    }

    let affected = as_json
        .get("n")
        .and_then(|n| n.as_u64())
        .unwrap_or_default();
    QueryOutput {
        columns: vec!["result".to_string()],
        rows: vec![vec![as_json]],
        rows_affected: affected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_replies_flatten_to_rows() {
        let response = doc! {
            "cursor": { "firstBatch": [ {"_id": 1}, {"_id": 2} ], "id": 0i64 },
            "ok": 1.0,
        };
        let out = response_to_output(&response);
        assert_eq!(out.columns, vec!["document"]);
        assert_eq!(out.rows.len(), 2);
    }

    #[test]
    fn plain_replies_keep_result_column_and_count() {
        let response = doc! { "n": 3i64, "ok": 1.0 };
        let out = response_to_output(&response);
        assert_eq!(out.columns, vec!["result"]);
        assert_eq!(out.rows_affected, 3);
    }
}
