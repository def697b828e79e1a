use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::JrmError;

/// Values that can travel through the library: query parameters, record
/// fields and result cells all use this one enum so no caller ever touches
/// driver-specific types.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Calendar date
    Date(NaiveDate),
    /// Timestamp without timezone
    Timestamp(NaiveDateTime),
    /// JSON value (nested mappings and mixed structures)
    Json(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
    /// A sequence of values; used for `IN` lists and array-typed fields
    Array(Vec<DbValue>),
    /// NULL value
    Null,
}

impl DbValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let DbValue::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            DbValue::Float(value) => Some(*value),
            DbValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let DbValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DbValue::Bool(value) => Some(*value),
            DbValue::Int(0) => Some(false),
            DbValue::Int(1) => Some(true),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            DbValue::Timestamp(value) => Some(*value),
            DbValue::Text(s) => {
                // Try "YYYY-MM-DD HH:MM:SS" then a fractional-seconds form
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                    .ok()
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let DbValue::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[DbValue]> {
        if let DbValue::Array(items) = self {
            Some(items)
        } else {
            None
        }
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Int(v)
    }
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        DbValue::Int(i64::from(v))
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Float(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Bool(v)
    }
}

impl From<NaiveDate> for DbValue {
    fn from(v: NaiveDate) -> Self {
        DbValue::Date(v)
    }
}

impl From<NaiveDateTime> for DbValue {
    fn from(v: NaiveDateTime) -> Self {
        DbValue::Timestamp(v)
    }
}

impl From<JsonValue> for DbValue {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => DbValue::Null,
            JsonValue::Bool(b) => DbValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DbValue::Int(i)
                } else {
                    DbValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => DbValue::Text(s),
            JsonValue::Array(items) => {
                DbValue::Array(items.into_iter().map(DbValue::from).collect())
            }
            object => DbValue::Json(object),
        }
    }
}

impl From<Vec<DbValue>> for DbValue {
    fn from(v: Vec<DbValue>) -> Self {
        DbValue::Array(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => DbValue::Null,
        }
    }
}

/// The database backends understood by the dialect table.
///
/// `Generic` is selected for any tag outside the known set; it runs with
/// positional `?` placeholders and the `MERGE INTO` upsert template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// `PostgreSQL` database
    Postgres,
    /// MySQL or MariaDB database
    Mysql,
    /// `SQLite` database
    Sqlite,
    /// Oracle database
    Oracle,
    /// IBM Db2 database
    Db2,
    /// Microsoft SQL Server database
    #[serde(rename = "sqlserver")]
    SqlServer,
    /// Spark SQL session
    Spark,
    /// Any other driver with a cursor-shaped API
    Generic,
}

impl BackendType {
    /// Parse a backend token, accepting the aliases used in connection
    /// descriptors (`postgresql`, `mariadb`, `mssql`). Unknown tokens map to
    /// `Generic` rather than failing, mirroring connector dispatch.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => BackendType::Postgres,
            "mysql" | "mariadb" => BackendType::Mysql,
            "sqlite" => BackendType::Sqlite,
            "oracle" => BackendType::Oracle,
            "db2" => BackendType::Db2,
            "sqlserver" | "mssql" => BackendType::SqlServer,
            "spark" => BackendType::Spark,
            _ => BackendType::Generic,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Postgres => "postgres",
            BackendType::Mysql => "mysql",
            BackendType::Sqlite => "sqlite",
            BackendType::Oracle => "oracle",
            BackendType::Db2 => "db2",
            BackendType::SqlServer => "sqlserver",
            BackendType::Spark => "spark",
            BackendType::Generic => "generic",
        }
    }
}

impl Default for BackendType {
    fn default() -> Self {
        BackendType::Generic
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ANSI transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// The level as it appears in a `SET TRANSACTION` statement.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = JrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "READ UNCOMMITTED" => Ok(IsolationLevel::ReadUncommitted),
            "READ COMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "REPEATABLE READ" => Ok(IsolationLevel::RepeatableRead),
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            other => Err(JrmError::ConfigError(format!(
                "unknown isolation level: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_tokens_resolve_with_aliases() {
        assert_eq!(BackendType::from_token("postgresql"), BackendType::Postgres);
        assert_eq!(BackendType::from_token("mariadb"), BackendType::Mysql);
        assert_eq!(BackendType::from_token("MSSQL"), BackendType::SqlServer);
        assert_eq!(BackendType::from_token("duckdb"), BackendType::Generic);
    }

    #[test]
    fn value_accessors() {
        assert_eq!(DbValue::Int(1).as_bool(), Some(true));
        assert_eq!(DbValue::from("x").as_text(), Some("x"));
        assert!(DbValue::from(Option::<i64>::None).is_null());
        let ts = DbValue::Text("2024-05-01 10:30:00".into());
        assert!(ts.as_timestamp().is_some());
    }
}
