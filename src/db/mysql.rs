//! MySQL driver over mysql_async.

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, Params, Value};

use crate::error::DbError;

use super::{CatalogEntry, CatalogKind, DatabaseKind, Driver, DriverConn, Dsn, Param, QueryOutput};

pub struct MySqlDriver {
    url: String,
}

impl MySqlDriver {
    pub fn new(dsn: &Dsn) -> Self {
        Self {
            url: dsn.expose().to_string(),
        }
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::MySql
    }

    async fn open(&self) -> Result<Box<dyn DriverConn>, DbError> {
        let opts = Opts::from_url(&self.url).map_err(|e| DbError::InvalidDsn(e.to_string()))?;
        let conn = mysql_async::Conn::new(opts)
            .await
            .map_err(|e| DbError::ConnectFailed {
                kind: "mysql".into(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(MySqlConn { conn }))
    }
}

struct MySqlConn {
    conn: mysql_async::Conn,
}

#[async_trait]
impl DriverConn for MySqlConn {
    fn is_open(&self) -> bool {
        // mysql_async exposes no cheap closed flag; liveness comes from ping.
        true
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        self.conn
            .ping()
            .await
            .map_err(|e| DbError::Broken(e.to_string()))
    }

    async fn execute(&mut self, statement: &str, params: &[Param]) -> Result<QueryOutput, DbError> {
        let bound = if params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(params.iter().map(to_mysql_value).collect())
        };

        let mut result = self
            .conn
            .exec_iter(statement, bound)
            .await
            .map_err(query_error)?;

        let columns: Vec<String> = result
            .columns()
            .map(|cols| cols.iter().map(|c| c.name_str().into_owned()).collect())
            .unwrap_or_default();

        let raw_rows: Vec<mysql_async::Row> = result.collect().await.map_err(query_error)?;
        let rows_affected = result.affected_rows();
        drop(result);

        let rows = raw_rows
            .into_iter()
            .map(|row| row.unwrap().into_iter().map(value_to_json).collect())
            .collect();

        Ok(QueryOutput {
            columns,
            rows,
            rows_affected,
        })
    }

    async fn catalog(&mut self) -> Result<Vec<CatalogEntry>, DbError> {
        let mut entries = Vec::new();

        let tables: Vec<(String, String, String)> = self
            .conn
            .query(
                "SELECT table_schema, table_name, table_type \
                 FROM information_schema.tables \
                 WHERE table_schema NOT IN ('mysql', 'sys', 'performance_schema', 'information_schema')",
            )
            .await
            .map_err(query_error)?;
        for (schema, name, table_type) in tables {
            let kind = if table_type == "VIEW" {
                CatalogKind::View
            } else {
                CatalogKind::Table
            };
            entries.push(CatalogEntry::new(name, kind, DatabaseKind::MySql).owner(schema));
        }

        let columns: Vec<(String, String, String, String)> = self
            .conn
            .query(
                "SELECT table_schema, table_name, column_name, data_type \
                 FROM information_schema.columns \
                 WHERE table_schema NOT IN ('mysql', 'sys', 'performance_schema', 'information_schema')",
            )
            .await
            .map_err(query_error)?;
        for (schema, table, column, data_type) in columns {
            entries.push(
                CatalogEntry::new(column, CatalogKind::Column, DatabaseKind::MySql)
                    .owner(schema)
                    .parent(table)
                    .description(data_type),
            );
        }

        Ok(entries)
    }
}

fn query_error(e: mysql_async::Error) -> DbError {
    match &e {
        mysql_async::Error::Io(_) | mysql_async::Error::Driver(_) => DbError::Broken(e.to_string()),
        _ => DbError::Query(e.to_string()),
    }
}

fn to_mysql_value(param: &Param) -> Value {
    match param {
        Param::Null => Value::NULL,
        Param::Bool(b) => Value::Int(i64::from(*b)),
        Param::Int(i) => Value::Int(*i),
        Param::Float(f) => Value::Double(*f),
        Param::Text(t) => Value::Bytes(t.clone().into_bytes()),
    }
}

fn value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,
        Value::Bytes(bytes) => serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(i) => serde_json::json!(i),
        Value::UInt(u) => serde_json::json!(u),
        Value::Float(f) => serde_json::json!(f),
        Value::Double(d) => serde_json::json!(d),
        Value::Date(y, m, d, hh, mm, ss, _us) => serde_json::Value::String(format!(
            "{y:04}-{m:02}-{d:02} {hh:02}:{mm:02}:{ss:02}"
        )),
        Value::Time(neg, d, h, m, s, _us) => {
            let sign = if neg { "-" } else { "" };
            serde_json::Value::String(format!("{sign}{}:{m:02}:{s:02}", u32::from(h) + d * 24))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_map_to_mysql_values() {
        assert_eq!(to_mysql_value(&Param::Null), Value::NULL);
        assert_eq!(to_mysql_value(&Param::Int(7)), Value::Int(7));
        assert_eq!(
            to_mysql_value(&Param::Text("x".into())),
            Value::Bytes(b"x".to_vec())
        );
    }

    #[test]
    fn date_values_render_as_strings() {
        let v = value_to_json(Value::Date(2026, 7, 31, 12, 0, 5, 0));
        assert_eq!(v, serde_json::json!("2026-07-31 12:00:05"));
    }
}
