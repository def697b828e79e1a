//! PostgreSQL driver over the synchronous `postgres` client.

use std::io::Read;
use std::time::Duration;

use fallible_iterator::FallibleIterator;
use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls, Row, RowIter};

use crate::config::DatabaseConfig;
use crate::error::JrmError;
use crate::record::Record;
use crate::types::{DbValue, IsolationLevel};

use super::{DriverConnection, SqlCursor};

pub struct PostgresConnection {
    client: Client,
    autocommit: bool,
    in_txn: bool,
}

impl PostgresConnection {
    /// Connect using the descriptor's DSN, or compose a key-value
    /// connection string from its parts with the connect timeout applied.
    ///
    /// # Errors
    ///
    /// `PostgresError` on connect failure or timeout.
    pub fn connect(cfg: &DatabaseConfig, connect_timeout: Duration) -> Result<Self, JrmError> {
        let conn_str = match &cfg.dsn {
            Some(dsn) => dsn.clone(),
            None => {
                let mut parts = Vec::new();
                if let Some(host) = &cfg.host {
                    parts.push(format!("host={host}"));
                }
                if let Some(port) = cfg.port {
                    parts.push(format!("port={port}"));
                }
                if let Some(database) = &cfg.database {
                    parts.push(format!("dbname={database}"));
                }
                if let Some(user) = &cfg.user {
                    parts.push(format!("user={user}"));
                }
                if let Some(password) = &cfg.password {
                    parts.push(format!("password={password}"));
                }
                parts.push(format!("connect_timeout={}", connect_timeout.as_secs().max(1)));
                parts.join(" ")
            }
        };

        let client = Client::connect(&conn_str, NoTls)?;
        tracing::info!(
            "Connected to the postgres database '{}' at {}",
            cfg.database.as_deref().unwrap_or(""),
            cfg.host.as_deref().unwrap_or("")
        );
        Ok(Self {
            client,
            autocommit: true,
            in_txn: false,
        })
    }

    fn convert_params(params: &[DbValue]) -> Vec<Box<dyn ToSql + Sync>> {
        params
            .iter()
            .map(|p| -> Box<dyn ToSql + Sync> {
                match p {
                    DbValue::Int(i) => Box::new(*i),
                    DbValue::Float(f) => Box::new(*f),
                    DbValue::Text(s) => Box::new(s.clone()),
                    DbValue::Bool(b) => Box::new(*b),
                    DbValue::Date(d) => Box::new(*d),
                    DbValue::Timestamp(dt) => Box::new(*dt),
                    DbValue::Json(json) => Box::new(json.clone()),
                    DbValue::Blob(bytes) => Box::new(bytes.clone()),
                    DbValue::Array(_) => {
                        Box::new(crate::record::value_to_json(p).to_string())
                    }
                    DbValue::Null => Box::new(Option::<String>::None),
                }
            })
            .collect()
    }

    fn extract_value(row: &Row, index: usize, ty: &Type) -> DbValue {
        fn opt<T>(value: Result<Option<T>, postgres::Error>) -> Option<T> {
            value.ok().flatten()
        }

        let value = match ty.name() {
            "int2" => opt(row.try_get::<_, Option<i16>>(index)).map(|v| DbValue::Int(i64::from(v))),
            "int4" => opt(row.try_get::<_, Option<i32>>(index)).map(|v| DbValue::Int(i64::from(v))),
            "int8" | "oid" => opt(row.try_get::<_, Option<i64>>(index)).map(DbValue::Int),
            "float4" => {
                opt(row.try_get::<_, Option<f32>>(index)).map(|v| DbValue::Float(f64::from(v)))
            }
            "float8" => opt(row.try_get::<_, Option<f64>>(index)).map(DbValue::Float),
            "bool" => opt(row.try_get::<_, Option<bool>>(index)).map(DbValue::Bool),
            "date" => opt(row.try_get::<_, Option<chrono::NaiveDate>>(index)).map(DbValue::Date),
            "timestamp" => {
                opt(row.try_get::<_, Option<chrono::NaiveDateTime>>(index)).map(DbValue::Timestamp)
            }
            "timestamptz" => opt(row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(index))
                .map(|v| DbValue::Timestamp(v.naive_utc())),
            "json" | "jsonb" => {
                opt(row.try_get::<_, Option<serde_json::Value>>(index)).map(DbValue::Json)
            }
            "bytea" => opt(row.try_get::<_, Option<Vec<u8>>>(index)).map(DbValue::Blob),
            _ => match row.try_get::<_, Option<String>>(index) {
                Ok(v) => v.map(DbValue::Text),
                Err(_) => {
                    tracing::warn!("unhandled postgres column type {}; returning NULL", ty.name());
                    None
                }
            },
        };
        value.unwrap_or(DbValue::Null)
    }
}

impl DriverConnection for PostgresConnection {
    fn driver_name(&self) -> &'static str {
        "postgres"
    }

    fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, JrmError> {
        let boxed = Self::convert_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| &**b).collect();
        Ok(self.client.execute(sql, &refs)?)
    }

    fn query<'a>(
        &'a mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Box<dyn SqlCursor + 'a>, JrmError> {
        let stmt = self.client.prepare(sql)?;
        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let types: Vec<Type> = stmt.columns().iter().map(|c| c.type_().clone()).collect();

        let boxed = Self::convert_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| &**b).collect();
        // query_raw streams rows from the wire instead of collecting them.
        let iter = self.client.query_raw(&stmt, refs)?;

        Ok(Box::new(PostgresCursor {
            iter,
            columns,
            types,
        }))
    }

    fn set_autocommit(&mut self, on: bool) -> Result<(), JrmError> {
        if on {
            if self.in_txn {
                self.client.batch_execute("ROLLBACK")?;
                self.in_txn = false;
            }
        } else if self.autocommit && !self.in_txn {
            self.client.batch_execute("BEGIN")?;
            self.in_txn = true;
        }
        self.autocommit = on;
        Ok(())
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn commit(&mut self) -> Result<(), JrmError> {
        if self.in_txn {
            self.client.batch_execute("COMMIT")?;
            self.in_txn = false;
        }
        if !self.autocommit {
            self.client.batch_execute("BEGIN")?;
            self.in_txn = true;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), JrmError> {
        if self.in_txn {
            self.client.batch_execute("ROLLBACK")?;
            self.in_txn = false;
        }
        if !self.autocommit {
            self.client.batch_execute("BEGIN")?;
            self.in_txn = true;
        }
        Ok(())
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> Result<(), JrmError> {
        self.client
            .batch_execute(&format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()))?;
        Ok(())
    }

    fn ping(&mut self) -> Result<(), JrmError> {
        self.client
            .simple_query("SELECT 1")
            .map(|_| ())
            .map_err(|e| JrmError::ConnectionError(format!("postgres ping failed: {e}")))
    }

    fn copy_in(&mut self, sql: &str, reader: &mut dyn Read) -> Result<u64, JrmError> {
        let mut writer = self.client.copy_in(sql)?;
        std::io::copy(reader, &mut writer)?;
        Ok(writer.finish()?)
    }
}

struct PostgresCursor<'a> {
    iter: RowIter<'a>,
    columns: Vec<String>,
    types: Vec<Type>,
}

impl SqlCursor for PostgresCursor<'_> {
    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn next_row(&mut self) -> Result<Option<Record>, JrmError> {
        let Some(row) = self.iter.next()? else {
            return Ok(None);
        };
        let mut record = Record::with_capacity(self.columns.len());
        for (i, name) in self.columns.iter().enumerate() {
            record.set(
                name.clone(),
                PostgresConnection::extract_value(&row, i, &self.types[i]),
            );
        }
        Ok(Some(record))
    }
}
