//! SQLite driver over rusqlite.

use std::collections::VecDeque;

use rusqlite::Connection;
use rusqlite::types::{Value as SqliteValue, ValueRef};

use crate::config::DatabaseConfig;
use crate::error::JrmError;
use crate::record::Record;
use crate::types::{DbValue, IsolationLevel};

use super::{DriverConnection, SqlCursor};

pub struct SqliteConnection {
    conn: Connection,
    autocommit: bool,
}

impl SqliteConnection {
    /// Open the database file named in the descriptor, or an in-memory
    /// database for `:memory:`.
    ///
    /// # Errors
    ///
    /// `SqliteError` when the file cannot be opened.
    pub fn connect(cfg: &DatabaseConfig) -> Result<Self, JrmError> {
        let path = cfg.database.as_deref().unwrap_or(":memory:");
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        tracing::info!("Connected to the sqlite database '{path}'");
        Ok(Self {
            conn,
            autocommit: true,
        })
    }

    fn convert_params(params: &[DbValue]) -> Vec<SqliteValue> {
        params
            .iter()
            .map(|p| match p {
                DbValue::Int(i) => SqliteValue::Integer(*i),
                DbValue::Float(f) => SqliteValue::Real(*f),
                DbValue::Text(s) => SqliteValue::Text(s.clone()),
                DbValue::Bool(b) => SqliteValue::Integer(i64::from(*b)),
                DbValue::Date(d) => SqliteValue::Text(d.to_string()),
                DbValue::Timestamp(dt) => {
                    SqliteValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string())
                }
                DbValue::Json(json) => SqliteValue::Text(json.to_string()),
                DbValue::Blob(bytes) => SqliteValue::Blob(bytes.clone()),
                DbValue::Array(_) => {
                    SqliteValue::Text(crate::record::value_to_json(p).to_string())
                }
                DbValue::Null => SqliteValue::Null,
            })
            .collect()
    }

    fn extract_value(value: ValueRef<'_>) -> DbValue {
        match value {
            ValueRef::Null => DbValue::Null,
            ValueRef::Integer(i) => DbValue::Int(i),
            ValueRef::Real(f) => DbValue::Float(f),
            ValueRef::Text(bytes) => DbValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => DbValue::Blob(bytes.to_vec()),
        }
    }
}

impl DriverConnection for SqliteConnection {
    fn driver_name(&self) -> &'static str {
        "rusqlite"
    }

    fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, JrmError> {
        let values = Self::convert_params(params);
        let mut stmt = self.conn.prepare(sql)?;
        let affected = stmt.execute(rusqlite::params_from_iter(values))?;
        Ok(affected as u64)
    }

    fn query<'a>(
        &'a mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Box<dyn SqlCursor + 'a>, JrmError> {
        let values = Self::convert_params(params);
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|&c| c.to_string()).collect();

        // SQLite runs in-process; materializing the set is the client-side
        // fetch loop for an engine with no server cursor.
        let mut rows_out = VecDeque::new();
        let mut rows = stmt.query(rusqlite::params_from_iter(values))?;
        while let Some(row) = rows.next()? {
            let mut record = Record::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                record.set(name.clone(), Self::extract_value(row.get_ref(i)?));
            }
            rows_out.push_back(record);
        }

        Ok(Box::new(SqliteCursor {
            columns,
            rows: rows_out,
        }))
    }

    fn set_autocommit(&mut self, on: bool) -> Result<(), JrmError> {
        if on {
            if !self.conn.is_autocommit() {
                self.conn.execute_batch("ROLLBACK")?;
            }
        } else if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        self.autocommit = on;
        Ok(())
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn commit(&mut self) -> Result<(), JrmError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        if !self.autocommit {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), JrmError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        if !self.autocommit {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn set_isolation(&mut self, level: IsolationLevel) -> Result<(), JrmError> {
        tracing::warn!(
            "SQLite has limited isolation level support; ignoring {}",
            level.as_sql()
        );
        Ok(())
    }

    fn ping(&mut self) -> Result<(), JrmError> {
        self.conn
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| JrmError::ConnectionError(format!("sqlite ping failed: {e}")))
    }
}

struct SqliteCursor {
    columns: Vec<String>,
    rows: VecDeque<Record>,
}

impl SqlCursor for SqliteCursor {
    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn next_row(&mut self) -> Result<Option<Record>, JrmError> {
        Ok(self.rows.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BackendType;

    fn memory_conn() -> SqliteConnection {
        let cfg = DatabaseConfig {
            backend: BackendType::Sqlite,
            database: Some(":memory:".into()),
            ..DatabaseConfig::default()
        };
        SqliteConnection::connect(&cfg).unwrap()
    }

    #[test]
    fn execute_and_query_round_trip() {
        let mut conn = memory_conn();
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT)", &[])
            .unwrap();
        let affected = conn
            .execute(
                "INSERT INTO t VALUES (?, ?)",
                &[DbValue::Int(1), DbValue::from("alice")],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let mut cursor = conn.query("SELECT id, name FROM t", &[]).unwrap();
        assert_eq!(cursor.columns(), vec!["id", "name"]);
        let row = cursor.next_row().unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&DbValue::Text("alice".into())));
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn transaction_toggle_and_rollback() {
        let mut conn = memory_conn();
        conn.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();

        conn.set_autocommit(false).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        conn.rollback().unwrap();
        conn.set_autocommit(true).unwrap();

        let mut cursor = conn.query("SELECT id FROM t", &[]).unwrap();
        assert!(cursor.next_row().unwrap().is_none());
    }
}
