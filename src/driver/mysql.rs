//! MySQL/MariaDB driver over the `mysql` crate.

use std::time::Duration;

use mysql::prelude::Queryable;
use mysql::{Binary, Conn, Opts, OptsBuilder, QueryResult, Row, Value};

use crate::config::DatabaseConfig;
use crate::error::JrmError;
use crate::record::Record;
use crate::types::{DbValue, IsolationLevel};

use super::{DriverConnection, SqlCursor};

pub struct MysqlConnection {
    conn: Conn,
    autocommit: bool,
}

impl MysqlConnection {
    /// Connect using the descriptor's DSN URL or discrete parts, with the
    /// connect timeout applied.
    ///
    /// # Errors
    ///
    /// `MysqlError` on connect failure.
    pub fn connect(cfg: &DatabaseConfig, connect_timeout: Duration) -> Result<Self, JrmError> {
        let opts = match &cfg.dsn {
            Some(dsn) => {
                let base = Opts::from_url(dsn)
                    .map_err(|e| JrmError::ConfigError(format!("invalid mysql DSN: {e}")))?;
                OptsBuilder::from_opts(base).tcp_connect_timeout(Some(connect_timeout))
            }
            None => OptsBuilder::new()
                .ip_or_hostname(cfg.host.clone())
                .tcp_port(cfg.port.unwrap_or(3306))
                .user(cfg.user.clone())
                .pass(cfg.password.clone())
                .db_name(cfg.database.clone())
                .tcp_connect_timeout(Some(connect_timeout)),
        };

        let conn = Conn::new(opts)?;
        tracing::info!(
            "Connected to the mysql database '{}' at {}",
            cfg.database.as_deref().unwrap_or(""),
            cfg.host.as_deref().unwrap_or("")
        );
        Ok(Self {
            conn,
            autocommit: true,
        })
    }

    fn convert_params(params: &[DbValue]) -> Vec<Value> {
        params
            .iter()
            .map(|p| match p {
                DbValue::Int(i) => Value::Int(*i),
                DbValue::Float(f) => Value::Double(*f),
                DbValue::Text(s) => Value::Bytes(s.clone().into_bytes()),
                DbValue::Bool(b) => Value::Int(i64::from(*b)),
                DbValue::Date(d) => {
                    use chrono::Datelike;
                    Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
                }
                DbValue::Timestamp(dt) => {
                    use chrono::{Datelike, Timelike};
                    Value::Date(
                        dt.year() as u16,
                        dt.month() as u8,
                        dt.day() as u8,
                        dt.hour() as u8,
                        dt.minute() as u8,
                        dt.second() as u8,
                        dt.and_utc().timestamp_subsec_micros(),
                    )
                }
                DbValue::Json(json) => Value::Bytes(json.to_string().into_bytes()),
                DbValue::Blob(bytes) => Value::Bytes(bytes.clone()),
                DbValue::Array(_) => {
                    Value::Bytes(crate::record::value_to_json(p).to_string().into_bytes())
                }
                DbValue::Null => Value::NULL,
            })
            .collect()
    }

    fn extract_value(value: &Value) -> DbValue {
        match value {
            Value::NULL => DbValue::Null,
            Value::Int(i) => DbValue::Int(*i),
            Value::UInt(u) => DbValue::Int(*u as i64),
            Value::Float(f) => DbValue::Float(f64::from(*f)),
            Value::Double(f) => DbValue::Float(*f),
            Value::Bytes(bytes) => match String::from_utf8(bytes.clone()) {
                Ok(text) => DbValue::Text(text),
                Err(_) => DbValue::Blob(bytes.clone()),
            },
            Value::Date(y, m, d, 0, 0, 0, 0) => {
                match chrono::NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*m), u32::from(*d)) {
                    Some(date) => DbValue::Date(date),
                    None => DbValue::Null,
                }
            }
            Value::Date(y, m, d, h, mi, s, us) => {
                let ts = chrono::NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*m), u32::from(*d))
                    .and_then(|date| {
                        date.and_hms_micro_opt(u32::from(*h), u32::from(*mi), u32::from(*s), *us)
                    });
                match ts {
                    Some(ts) => DbValue::Timestamp(ts),
                    None => DbValue::Null,
                }
            }
            Value::Time(neg, days, h, m, s, us) => {
                let sign = if *neg { "-" } else { "" };
                let hours = u32::from(*days) * 24 + u32::from(*h);
                DbValue::Text(format!("{sign}{hours:02}:{m:02}:{s:02}.{us:06}"))
            }
        }
    }
}

impl DriverConnection for MysqlConnection {
    fn driver_name(&self) -> &'static str {
        "mysql"
    }

    fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, JrmError> {
        if params.is_empty() {
            // Text protocol: DDL and multi-keyword statements that the
            // binary protocol refuses to prepare.
            self.conn.query_drop(sql)?;
        } else {
            self.conn
                .exec_drop(sql, mysql::Params::Positional(Self::convert_params(params)))?;
        }
        Ok(self.conn.affected_rows())
    }

    fn query<'a>(
        &'a mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Box<dyn SqlCursor + 'a>, JrmError> {
        let mysql_params = if params.is_empty() {
            mysql::Params::Empty
        } else {
            mysql::Params::Positional(Self::convert_params(params))
        };
        let result = self.conn.exec_iter(sql, mysql_params)?;
        let columns = result
            .columns()
            .as_ref()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect();
        Ok(Box::new(MysqlCursor { result, columns }))
    }

    fn set_autocommit(&mut self, on: bool) -> Result<(), JrmError> {
        self.conn
            .query_drop(if on { "SET autocommit=1" } else { "SET autocommit=0" })?;
        self.autocommit = on;
        Ok(())
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn commit(&mut self) -> Result<(), JrmError> {
        self.conn.query_drop("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), JrmError> {
        self.conn.query_drop("ROLLBACK")?;
        Ok(())
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> Result<(), JrmError> {
        self.conn.query_drop(&format!(
            "SET SESSION TRANSACTION ISOLATION LEVEL {}",
            level.as_sql()
        ))?;
        Ok(())
    }

    fn ping(&mut self) -> Result<(), JrmError> {
        self.conn
            .query_drop("SELECT 1")
            .map_err(|e| JrmError::ConnectionError(format!("mysql ping failed: {e}")))
    }
}

struct MysqlCursor<'c, 't, 'tc> {
    result: QueryResult<'c, 't, 'tc, Binary>,
    columns: Vec<String>,
}

impl SqlCursor for MysqlCursor<'_, '_, '_> {
    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn next_row(&mut self) -> Result<Option<Record>, JrmError> {
        let Some(row) = self.result.next() else {
            return Ok(None);
        };
        let row: Row = row?;
        let mut record = Record::with_capacity(self.columns.len());
        for (i, name) in self.columns.iter().enumerate() {
            let value = row
                .as_ref(i)
                .map(MysqlConnection::extract_value)
                .unwrap_or(DbValue::Null);
            record.set(name.clone(), value);
        }
        Ok(Some(record))
    }
}
