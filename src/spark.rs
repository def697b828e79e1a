//! Spark SQL adapter.
//!
//! Spark has no wire driver; the adapter speaks to a caller-supplied
//! session (Connect gateway, Livy, an embedded engine) through the
//! [`SparkSession`] trait and translates the same facade operations onto
//! SQL. Sessions have no transactions, so commit and rollback are no-ops;
//! UPDATE, DELETE and MERGE require the target to be a Delta table.

use std::sync::Arc;
use std::time::Duration;

use crate::bulk::LoadRequest;
use crate::condition::{Condition, compile_inline};
use crate::config::DatabaseConfig;
use crate::driver::{DriverConnection, DriverFactory, SqlCursor};
use crate::error::JrmError;
use crate::placeholder::{self, Params};
use crate::pool::Client;
use crate::record::Record;
use crate::result::DbResult;
use crate::types::DbValue;
use crate::value_format::sql_literal;

/// A collected result frame: column names plus rows.
#[derive(Debug, Clone, Default)]
pub struct SparkFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DbValue>>,
}

/// The session seam. `sql` receives named parameters only when the engine
/// version supports them (3.4+); otherwise the adapter inlines values into
/// the statement before calling.
pub trait SparkSession: Send {
    /// Engine version string, e.g. `"3.5.1"`. Probed once at connection
    /// construction to decide parameter support.
    fn version(&self) -> String;

    /// Run a statement and collect the result.
    ///
    /// # Errors
    ///
    /// Engine-reported failures.
    fn sql(&mut self, query: &str, params: &[(String, DbValue)]) -> Result<SparkFrame, JrmError>;

    /// Read a file and append/overwrite it into a table
    /// (`spark.read.<format>(path).write.saveAsTable(...)`).
    ///
    /// # Errors
    ///
    /// `Unsupported` unless the session implements file loads.
    fn load_file(&mut self, table: &str, request: &LoadRequest) -> Result<u64, JrmError> {
        let _ = (table, request);
        Err(JrmError::Unsupported(
            "this Spark session does not implement file loads".to_string(),
        ))
    }
}

/// Factory producing sessions for the pool.
pub trait SparkSessionFactory: Send + Sync {
    /// # Errors
    ///
    /// `ConnectionError` when the session cannot be established.
    fn session(&self, cfg: &DatabaseConfig) -> Result<Box<dyn SparkSession>, JrmError>;
}

/// Wrap a session factory as a pool driver factory.
pub fn driver_factory(factory: Arc<dyn SparkSessionFactory>) -> Arc<dyn DriverFactory> {
    Arc::new(SparkDriverFactory { factory })
}

struct SparkDriverFactory {
    factory: Arc<dyn SparkSessionFactory>,
}

impl DriverFactory for SparkDriverFactory {
    fn name(&self) -> &'static str {
        "spark"
    }

    fn connect(
        &self,
        cfg: &DatabaseConfig,
        _connect_timeout: Duration,
    ) -> Result<Box<dyn DriverConnection>, JrmError> {
        Ok(Box::new(SparkConnection::new(self.factory.session(cfg)?)))
    }
}

/// Driver-shaped wrapper around a Spark session.
pub struct SparkConnection {
    session: Box<dyn SparkSession>,
    parameterized: bool,
}

impl SparkConnection {
    #[must_use]
    pub fn new(session: Box<dyn SparkSession>) -> Self {
        // Probe once: native parameterized queries arrived in Spark 3.4.
        let version = session.version();
        let parameterized = version_at_least(&version, 3, 4);
        if parameterized {
            tracing::debug!("Spark {version}: using native parameterized queries");
        } else {
            tracing::debug!("Spark {version}: inlining values into SQL");
        }
        Self {
            session,
            parameterized,
        }
    }

    /// Resolve positional params into either named engine parameters or
    /// inlined literals, depending on version support.
    fn render(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<(String, Vec<(String, DbValue)>), JrmError> {
        if params.is_empty() {
            return Ok((sql.to_string(), Vec::new()));
        }
        let params = Params::Positional(params.to_vec());
        if self.parameterized {
            let (sql, values) =
                placeholder::bind_with(sql, &params, &mut |index| format!(":p{index}"))?;
            let named = values
                .into_iter()
                .enumerate()
                .map(|(i, value)| (format!("p{}", i + 1), value))
                .collect();
            Ok((sql, named))
        } else {
            Ok((placeholder::bind_inline(sql, &params)?, Vec::new()))
        }
    }
}

fn version_at_least(version: &str, major: u32, minor: u32) -> bool {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let v_major = parts.next().unwrap_or(0);
    let v_minor = parts.next().unwrap_or(0);
    (v_major, v_minor) >= (major, minor)
}

impl DriverConnection for SparkConnection {
    fn driver_name(&self) -> &'static str {
        "spark"
    }

    fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, JrmError> {
        let (sql, named) = self.render(sql, params)?;
        tracing::debug!("Spark SQL execute: {sql}");
        self.session.sql(&sql, &named)?;
        // Spark reports no affected-row count for DML.
        Ok(0)
    }

    fn query<'a>(
        &'a mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Box<dyn SqlCursor + 'a>, JrmError> {
        let (sql, named) = self.render(sql, params)?;
        tracing::debug!("Spark SQL query: {sql}");
        let frame = self.session.sql(&sql, &named)?;
        Ok(Box::new(SparkCursor::new(frame)))
    }

    fn set_autocommit(&mut self, _on: bool) -> Result<(), JrmError> {
        // Sessions are always-on; there is no autocommit to toggle.
        Ok(())
    }

    fn autocommit(&self) -> bool {
        true
    }

    fn commit(&mut self) -> Result<(), JrmError> {
        tracing::debug!("Spark: commit() is a no-op");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), JrmError> {
        tracing::debug!("Spark: rollback() is a no-op");
        Ok(())
    }

    fn set_isolation(&mut self, _level: crate::types::IsolationLevel) -> Result<(), JrmError> {
        tracing::debug!("Spark SQL does not support isolation levels");
        Ok(())
    }

    fn ping(&mut self) -> Result<(), JrmError> {
        self.session
            .sql("SELECT 1", &[])
            .map(|_| ())
            .map_err(|e| JrmError::ConnectionError(format!("spark ping failed: {e}")))
    }

    fn load_file(&mut self, table: &str, request: &LoadRequest) -> Result<u64, JrmError> {
        self.session.load_file(table, request)
    }
}

/// Local iterator over a collected frame.
struct SparkCursor {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Vec<DbValue>>,
}

impl SparkCursor {
    fn new(frame: SparkFrame) -> Self {
        Self {
            columns: frame.columns,
            rows: frame.rows.into_iter(),
        }
    }
}

impl SqlCursor for SparkCursor {
    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn next_row(&mut self) -> Result<Option<Record>, JrmError> {
        Ok(self.rows.next().map(|row| {
            self.columns
                .iter()
                .cloned()
                .zip(row)
                .collect::<Record>()
        }))
    }
}

/// Check whether a table is stored in Delta format.
fn is_delta_table(client: &mut Client, table: &str) -> Result<bool, JrmError> {
    let mut cursor = client
        .connection()
        .query(&format!("DESCRIBE DETAIL {table}"), &[])?;
    let Some(row) = cursor.next_row()? else {
        return Ok(false);
    };
    Ok(row
        .get("format")
        .and_then(DbValue::as_text)
        .is_some_and(|format| format.eq_ignore_ascii_case("delta")))
}

fn delta_guard(client: &mut Client, operation: &str, table: &str) -> Option<DbResult> {
    match is_delta_table(client, table) {
        Ok(true) => None,
        Ok(false) => Some(DbResult::from_error(
            operation,
            &JrmError::DeltaRequired(format!(
                "{operation} on {table} requires a Delta table"
            )),
        )),
        Err(e) => Some(DbResult::from_error(operation, &e)),
    }
}

pub(crate) fn update(
    client: &mut Client,
    table: &str,
    data: &Record,
    condition: Option<&Condition>,
) -> DbResult {
    if let Some(failed) = delta_guard(client, "update", table) {
        return failed;
    }
    let sets = data
        .iter()
        .map(|(column, value)| format!("{column} = {}", sql_literal(value)))
        .collect::<Vec<_>>()
        .join(", ");
    let predicate = match compile_inline(condition) {
        Ok(p) => p,
        Err(e) => return DbResult::from_error("update", &e),
    };
    let mut sql = format!("UPDATE {table} SET {sets}");
    if !predicate.is_empty() {
        sql.push_str(&format!(" WHERE {predicate}"));
    }
    match client.connection().execute(&sql, &[]) {
        Ok(_) => {
            let message = format!("UPDATE on {table} succeeded");
            tracing::info!("{message}");
            DbResult::ok(message, -1)
        }
        Err(e) => DbResult::from_error("update", &e),
    }
}

pub(crate) fn delete(client: &mut Client, table: &str, condition: Option<&Condition>) -> DbResult {
    if let Some(failed) = delta_guard(client, "delete", table) {
        return failed;
    }
    let predicate = match compile_inline(condition) {
        Ok(p) => p,
        Err(e) => return DbResult::from_error("delete", &e),
    };
    let mut sql = format!("DELETE FROM {table}");
    if !predicate.is_empty() {
        sql.push_str(&format!(" WHERE {predicate}"));
    }
    match client.connection().execute(&sql, &[]) {
        Ok(_) => {
            let message = format!("DELETE on {table} succeeded");
            tracing::info!("{message}");
            DbResult::ok(message, -1)
        }
        Err(e) => DbResult::from_error("delete", &e),
    }
}

pub(crate) fn merge(
    client: &mut Client,
    table: &str,
    rows: &[Record],
    key_columns: &[&str],
    update_columns: Option<&[&str]>,
    no_update: bool,
) -> DbResult {
    if rows.is_empty() {
        return DbResult::ok("No data to merge", 0);
    }
    let plan = match crate::db::MergePlan::build(rows, key_columns, update_columns) {
        Ok(plan) => plan,
        Err(e) => return DbResult::from_error("merge", &e),
    };
    if let Some(failed) = delta_guard(client, "merge", table) {
        return failed;
    }

    let column_list = plan.columns.join(", ");
    let value_rows = rows
        .iter()
        .map(|row| {
            let parts = plan
                .columns
                .iter()
                .map(|column| {
                    row.get(column)
                        .map_or_else(|| "NULL".to_string(), sql_literal)
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({parts})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    let on = plan
        .key_columns
        .iter()
        .map(|key| format!("target.{key} = src.{key}"))
        .collect::<Vec<_>>()
        .join(" AND ");

    let mut sql = format!(
        "MERGE INTO {table} AS target USING (SELECT * FROM VALUES {value_rows} AS t({column_list})) AS src ON {on}"
    );
    if !no_update && !plan.update_columns.is_empty() {
        let sets = plan
            .update_columns
            .iter()
            .map(|col| format!("target.{col} = src.{col}"))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {sets}"));
    }
    let insert_values = plan
        .columns
        .iter()
        .map(|col| format!("src.{col}"))
        .collect::<Vec<_>>()
        .join(", ");
    sql.push_str(&format!(
        " WHEN NOT MATCHED THEN INSERT ({column_list}) VALUES ({insert_values})"
    ));

    tracing::debug!("Spark merge: {sql}");
    match client.connection().execute(&sql, &[]) {
        Ok(_) => {
            let count = rows.len() as i64;
            let message = format!("MERGE into {table} succeeded. {count} rows processed.");
            tracing::info!("{message}");
            DbResult::ok(message, count)
        }
        Err(e) => DbResult::from_error("merge", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_probe() {
        assert!(version_at_least("3.4.0", 3, 4));
        assert!(version_at_least("3.5.1", 3, 4));
        assert!(version_at_least("4.0.0", 3, 4));
        assert!(!version_at_least("3.3.2", 3, 4));
        assert!(!version_at_least("garbage", 3, 4));
    }
}
