//! PostgreSQL driver over tokio-postgres.
//!
//! Each `DriverConn` owns one client plus the task polling its connection
//! half. Catalog ingest reads `information_schema`.

use async_trait::async_trait;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row};

use crate::error::DbError;

use super::{CatalogEntry, CatalogKind, DatabaseKind, Driver, DriverConn, Dsn, Param, QueryOutput};

pub struct PostgresDriver {
    dsn: String,
}

impl PostgresDriver {
    pub fn new(dsn: &Dsn) -> Self {
        Self {
            dsn: dsn.expose().to_string(),
        }
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    async fn open(&self) -> Result<Box<dyn DriverConn>, DbError> {
        let (client, connection) =
            tokio_postgres::connect(&self.dsn, NoTls)
                .await
                .map_err(|e| DbError::ConnectFailed {
                    kind: "postgres".into(),
                    reason: e.to_string(),
                })?;
        let io_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "postgres connection task ended");
            }
        });
        Ok(Box::new(PostgresConn { client, io_task }))
    }
}

struct PostgresConn {
    client: tokio_postgres::Client,
    io_task: tokio::task::JoinHandle<()>,
}

impl Drop for PostgresConn {
    fn drop(&mut self) {
        self.io_task.abort();
    }
}

#[async_trait]
impl DriverConn for PostgresConn {
    fn is_open(&self) -> bool {
        !self.client.is_closed()
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(broken)
    }

    async fn execute(&mut self, statement: &str, params: &[Param]) -> Result<QueryOutput, DbError> {
        let owned: Vec<Box<dyn ToSql + Send + Sync>> = params.iter().map(to_sql_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = owned
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        if super::returns_rows(statement) {
            let rows = self
                .client
                .query(statement, &refs)
                .await
                .map_err(query_error)?;
            Ok(rows_to_output(&rows))
        } else {
            let affected = self
                .client
                .execute(statement, &refs)
                .await
                .map_err(query_error)?;
            Ok(QueryOutput {
                rows_affected: affected,
                ..Default::default()
            })
        }
    }

    async fn catalog(&mut self) -> Result<Vec<CatalogEntry>, DbError> {
        let mut entries = Vec::new();

        let tables = self
            .client
            .query(
                "SELECT table_schema, table_name, table_type \
                 FROM information_schema.tables \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema')",
                &[],
            )
            .await
            .map_err(query_error)?;
        for row in &tables {
            let schema: String = row.get(0);
            let name: String = row.get(1);
            let table_type: String = row.get(2);
            let kind = if table_type == "VIEW" {
                CatalogKind::View
            } else {
                CatalogKind::Table
            };
            entries.push(CatalogEntry::new(name, kind, DatabaseKind::Postgres).owner(schema));
        }

        let columns = self
            .client
            .query(
                "SELECT table_schema, table_name, column_name, data_type \
                 FROM information_schema.columns \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema')",
                &[],
            )
            .await
            .map_err(query_error)?;
        for row in &columns {
            let schema: String = row.get(0);
            let table: String = row.get(1);
            let column: String = row.get(2);
            let data_type: String = row.get(3);
            entries.push(
                CatalogEntry::new(column, CatalogKind::Column, DatabaseKind::Postgres)
                    .owner(schema)
                    .parent(table)
                    .description(data_type),
            );
        }

        Ok(entries)
    }
}

fn broken(e: tokio_postgres::Error) -> DbError {
    DbError::Broken(e.to_string())
}

fn query_error(e: tokio_postgres::Error) -> DbError {
    // Connection-level failures break the borrow; statement failures don't.
    if e.is_closed() {
        DbError::Broken(e.to_string())
    } else {
        DbError::Query(e.to_string())
    }
}

fn to_sql_param(param: &Param) -> Box<dyn ToSql + Send + Sync> {
    match param {
        Param::Null => Box::new(Option::<String>::None),
        Param::Bool(b) => Box::new(*b),
        Param::Int(i) => Box::new(*i),
        Param::Float(f) => Box::new(*f),
        Param::Text(t) => Box::new(t.clone()),
    }
}

fn rows_to_output(rows: &[Row]) -> QueryOutput {
    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect()
        })
        .unwrap_or_default();

    let data = rows
        .iter()
        .map(|row| {
            (0..row.len())
                .map(|i| cell_to_json(row, i))
                .collect::<Vec<serde_json::Value>>()
        })
        .collect();

    QueryOutput {
        columns,
        rows: data,
        rows_affected: 0,
    }
}

fn cell_to_json(row: &Row, idx: usize) -> serde_json::Value {
    let ty = row.columns()[idx].type_().clone();
    if ty == Type::BOOL {
        json_opt(row.try_get::<_, Option<bool>>(idx))
    } else if ty == Type::INT2 {
        json_opt(row.try_get::<_, Option<i16>>(idx))
    } else if ty == Type::INT4 {
        json_opt(row.try_get::<_, Option<i32>>(idx))
    } else if ty == Type::INT8 {
        json_opt(row.try_get::<_, Option<i64>>(idx))
    } else if ty == Type::FLOAT4 {
        json_opt(row.try_get::<_, Option<f32>>(idx))
    } else if ty == Type::FLOAT8 {
        json_opt(row.try_get::<_, Option<f64>>(idx))
    } else if ty == Type::JSON || ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .unwrap_or(serde_json::Value::Null)
    } else if ty == Type::UUID {
        json_opt(
            row.try_get::<_, Option<uuid::Uuid>>(idx)
                .map(|v| v.map(|u| u.to_string())),
        )
    } else if ty == Type::TIMESTAMPTZ {
        json_opt(
            row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .map(|v| v.map(|t| t.to_rfc3339())),
        )
    } else {
        match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
            Err(_) => serde_json::Value::String(format!("<{}>", ty.name())),
        }
    }
}

fn json_opt<T: Into<serde_json::Value>>(
    value: Result<Option<T>, tokio_postgres::Error>,
) -> serde_json::Value {
    match value {
        Ok(Some(v)) => v.into(),
        _ => serde_json::Value::Null,
    }
}
