//! SQLite driver over libsql (local files).

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::DbError;

use super::{CatalogEntry, CatalogKind, DatabaseKind, Driver, DriverConn, Dsn, Param, QueryOutput};

pub struct SqliteDriver {
    path: PathBuf,
}

impl SqliteDriver {
    pub fn new(dsn: &Dsn) -> Result<Self, DbError> {
        let path = dsn
            .database
            .clone()
            .ok_or_else(|| DbError::InvalidDsn("sqlite DSN is missing a path".into()))?;
        Ok(Self {
            path: PathBuf::from(path),
        })
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    async fn open(&self) -> Result<Box<dyn DriverConn>, DbError> {
        let db = libsql::Builder::new_local(&self.path)
            .build()
            .await
            .map_err(|e| DbError::ConnectFailed {
                kind: "sqlite".into(),
                reason: e.to_string(),
            })?;
        let conn = db.connect().map_err(|e| DbError::ConnectFailed {
            kind: "sqlite".into(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(SqliteConn { _db: db, conn }))
    }
}

struct SqliteConn {
    _db: libsql::Database,
    conn: libsql::Connection,
}

#[async_trait]
impl DriverConn for SqliteConn {
    fn is_open(&self) -> bool {
        true
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        self.conn
            .query("SELECT 1", ())
            .await
            .map(|_| ())
            .map_err(|e| DbError::Broken(e.to_string()))
    }

    async fn execute(&mut self, statement: &str, params: &[Param]) -> Result<QueryOutput, DbError> {
        let values: Vec<libsql::Value> = params.iter().map(to_sqlite_value).collect();
        let bound = libsql::params_from_iter(values);

        if super::returns_rows(statement) {
            let mut rows = self
                .conn
                .query(statement, bound)
                .await
                .map_err(|e| DbError::Query(e.to_string()))?;

            let column_count = rows.column_count() as usize;
            let columns: Vec<String> = (0..column_count)
                .map(|i| {
                    rows.column_name(i as i32)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("column_{i}"))
                })
                .collect();

            let mut data = Vec::new();
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| DbError::Query(e.to_string()))?
            {
                let mut cells = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    let value = row
                        .get_value(i as i32)
                        .map_err(|e| DbError::Query(e.to_string()))?;
                    cells.push(value_to_json(value));
                }
                data.push(cells);
            }

            Ok(QueryOutput {
                columns,
                rows: data,
                rows_affected: 0,
            })
        } else {
            let affected = self
                .conn
                .execute(statement, bound)
                .await
                .map_err(|e| DbError::Query(e.to_string()))?;
            Ok(QueryOutput {
                rows_affected: affected,
                ..Default::default()
            })
        }
    }

    async fn catalog(&mut self) -> Result<Vec<CatalogEntry>, DbError> {
        let mut entries = Vec::new();

        let mut tables = self
            .conn
            .query(
                "SELECT name, type FROM sqlite_master \
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'",
                (),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let mut names = Vec::new();
        while let Some(row) = tables
            .next()
            .await
            .map_err(|e| DbError::Query(e.to_string()))?
        {
            let name: String = row.get(0).map_err(|e| DbError::Query(e.to_string()))?;
            let kind_text: String = row.get(1).map_err(|e| DbError::Query(e.to_string()))?;
            let kind = if kind_text == "view" {
                CatalogKind::View
            } else {
                CatalogKind::Table
            };
            entries.push(CatalogEntry::new(name.clone(), kind, DatabaseKind::Sqlite));
            names.push(name);
        }

        for table in names {
            let mut columns = self
                .conn
                .query(
                    "SELECT name, type FROM pragma_table_info(?1)",
                    libsql::params![table.clone()],
                )
                .await
                .map_err(|e| DbError::Query(e.to_string()))?;
            while let Some(row) = columns
                .next()
                .await
                .map_err(|e| DbError::Query(e.to_string()))?
            {
                let column: String = row.get(0).map_err(|e| DbError::Query(e.to_string()))?;
                let data_type: String = row.get(1).map_err(|e| DbError::Query(e.to_string()))?;
                entries.push(
                    CatalogEntry::new(column, CatalogKind::Column, DatabaseKind::Sqlite)
                        .parent(table.clone())
                        .description(data_type),
                );
            }
        }

        Ok(entries)
    }
}

fn to_sqlite_value(param: &Param) -> libsql::Value {
    match param {
        Param::Null => libsql::Value::Null,
        Param::Bool(b) => libsql::Value::Integer(i64::from(*b)),
        Param::Int(i) => libsql::Value::Integer(*i),
        Param::Float(f) => libsql::Value::Real(*f),
        Param::Text(t) => libsql::Value::Text(t.clone()),
    }
}

fn value_to_json(value: libsql::Value) -> serde_json::Value {
    match value {
        libsql::Value::Null => serde_json::Value::Null,
        libsql::Value::Integer(i) => serde_json::json!(i),
        libsql::Value::Real(f) => serde_json::json!(f),
        libsql::Value::Text(t) => serde_json::Value::String(t),
        libsql::Value::Blob(bytes) => {
            serde_json::Value::String(format!("<blob {} bytes>", bytes.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseClient;
    use crate::config::DatabaseConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            pool_min: 1,
            pool_max: 2,
            acquire_timeout: Duration::from_secs(1),
            validation_window: Duration::from_secs(5),
            max_validation_retries: 3,
            health_sweep_interval: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn sqlite_end_to_end_execute_and_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let dsn = Dsn::parse(&format!("sqlite://{}", db_path.display())).unwrap();

        let driver = Arc::new(SqliteDriver::new(&dsn).unwrap());
        let client = crate::db::Client::with_driver(
            driver,
            dsn.redacted.clone(),
            &config(),
            None,
        )
        .await
        .unwrap();

        client
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT)", &[])
            .await
            .unwrap();
        let insert = client
            .execute(
                "INSERT INTO users (id, email) VALUES (?1, ?2)",
                &[Param::Int(1), Param::Text("a@example.com".into())],
            )
            .await
            .unwrap();
        assert_eq!(insert.rows_affected, 1);

        let select = client
            .execute("SELECT id, email FROM users", &[])
            .await
            .unwrap();
        assert_eq!(select.columns, vec!["id", "email"]);
        assert_eq!(select.rows.len(), 1);
        assert_eq!(select.rows[0][1], serde_json::json!("a@example.com"));

        let catalog = client.load_catalog().await.unwrap();
        assert!(catalog
            .iter()
            .any(|e| e.name == "users" && e.kind == CatalogKind::Table));
        assert!(catalog
            .iter()
            .any(|e| e.name == "email" && e.kind == CatalogKind::Column));

        let health = client.health().await;
        assert!(health.healthy);
    }
}
