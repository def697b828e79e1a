//! Bulk-load dispatcher.
//!
//! One request shape fans out to the native path for each backend:
//! PostgreSQL `COPY ... FROM STDIN`, Db2 `ADMIN_CMD('LOAD ...')`, the Spark
//! session's file loader, `INSERT INTO ... SELECT` for query sources, and a
//! batched-INSERT fallback everywhere else.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::db::Db;
use crate::error::JrmError;
use crate::record::Record;
use crate::result::DbResult;
use crate::types::{BackendType, DbValue};

/// Where the data comes from.
pub enum LoadSource {
    /// Infer: `SELECT`/`WITH` text is a query, anything else a file path.
    Auto(String),
    File(PathBuf),
    /// An in-memory stream (PostgreSQL COPY and the generic fallback).
    Reader(Box<dyn Read + Send>),
    Query(String),
}

impl std::fmt::Debug for LoadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadSource::Auto(s) => f.debug_tuple("Auto").field(s).finish(),
            LoadSource::File(p) => f.debug_tuple("File").field(p).finish(),
            LoadSource::Reader(_) => f.write_str("Reader(..)"),
            LoadSource::Query(q) => f.debug_tuple("Query").field(q).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    #[default]
    Append,
    Replace,
}

/// A bulk-load request.
#[derive(Debug)]
pub struct LoadRequest {
    pub source: LoadSource,
    /// File format: `csv` (default), `text`, `parquet`, ... (Spark), or a
    /// Db2 filetype (`DEL`, `IXF`).
    pub format: String,
    pub delimiter: char,
    pub header: bool,
    pub null_value: Option<String>,
    pub quote: char,
    pub encoding: String,
    pub mode: LoadMode,
    pub columns: Option<Vec<String>>,
    /// Db2 LOAD warning budget.
    pub warning_count: u32,
}

impl LoadRequest {
    fn with_source(source: LoadSource) -> Self {
        Self {
            source,
            format: "csv".to_string(),
            delimiter: ',',
            header: false,
            null_value: None,
            quote: '"',
            encoding: "UTF8".to_string(),
            mode: LoadMode::default(),
            columns: None,
            warning_count: 100,
        }
    }

    /// Infer file-vs-query from the string.
    #[must_use]
    pub fn auto(source: impl Into<String>) -> Self {
        Self::with_source(LoadSource::Auto(source.into()))
    }

    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::with_source(LoadSource::File(path.into()))
    }

    #[must_use]
    pub fn from_query(sql: impl Into<String>) -> Self {
        Self::with_source(LoadSource::Query(sql.into()))
    }

    #[must_use]
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Self {
        Self::with_source(LoadSource::Reader(reader))
    }

    #[must_use]
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    #[must_use]
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    #[must_use]
    pub fn header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    #[must_use]
    pub fn null_value(mut self, null_value: impl Into<String>) -> Self {
        self.null_value = Some(null_value.into());
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|s| s.to_string()).collect());
        self
    }

    #[must_use]
    pub fn warning_count(mut self, warning_count: u32) -> Self {
        self.warning_count = warning_count;
        self
    }

    fn resolve_source(self) -> Self {
        match self.source {
            LoadSource::Auto(text) => {
                let upper = text.trim().to_ascii_uppercase();
                let source = if upper.starts_with("SELECT")
                    || upper.starts_with("(SELECT")
                    || upper.starts_with("WITH")
                {
                    LoadSource::Query(text)
                } else {
                    LoadSource::File(PathBuf::from(text))
                };
                Self { source, ..self }
            }
            _ => self,
        }
    }
}

/// Split a `"table(c1, c2)"` target into the bare table and its columns.
fn split_target(table: &str) -> (String, Option<Vec<String>>) {
    match table.split_once('(') {
        Some((name, cols)) => {
            let columns = cols
                .trim_end_matches(')')
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>();
            (name.trim().to_string(), Some(columns))
        }
        None => (table.to_string(), None),
    }
}

impl Db<'_> {
    /// Bulk-load data into `table` through the backend's native path.
    /// The target may carry a column list: `"my_table(c1, c2)"`.
    pub fn bulk_load(&mut self, table: &str, request: LoadRequest) -> DbResult {
        let mut request = request.resolve_source();
        let (table, target_columns) = split_target(table);
        if request.columns.is_none() {
            request.columns = target_columns;
        }

        let result = match self.backend() {
            BackendType::Postgres => self.postgres_bulk_load(&table, request),
            BackendType::Db2 => self.db2_bulk_load(&table, &request),
            BackendType::Spark => self.spark_bulk_load(&table, &request),
            _ => self.generic_bulk_load(&table, request),
        };
        match result {
            Ok(result) => result,
            Err(e) => DbResult::from_error("bulk load", &e),
        }
    }

    fn insert_select(&mut self, table: &str, request: &LoadRequest, query: &str) -> DbResult {
        let sql = match &request.columns {
            Some(columns) => format!("INSERT INTO {table} ({}) {query}", columns.join(", ")),
            None => format!("INSERT INTO {table} {query}"),
        };
        self.execute(&sql, ())
    }

    fn postgres_bulk_load(
        &mut self,
        table: &str,
        request: LoadRequest,
    ) -> Result<DbResult, JrmError> {
        if let LoadSource::Query(query) = &request.source {
            return Ok(self.insert_select(table, &request, &query.clone()));
        }

        let mut options = vec![
            format!("FORMAT {}", request.format),
            format!("DELIMITER '{}'", request.delimiter),
        ];
        if let Some(null_value) = &request.null_value {
            options.push(format!("NULL '{null_value}'"));
        }
        if request.header {
            options.push("HEADER".to_string());
        }
        if request.format.eq_ignore_ascii_case("csv") {
            options.push(format!("QUOTE '{}'", request.quote));
        }
        options.push(format!("ENCODING '{}'", request.encoding));

        let col_clause = request
            .columns
            .as_ref()
            .map(|cols| format!(" ({})", cols.join(", ")))
            .unwrap_or_default();
        let sql = format!(
            "COPY {table}{col_clause} FROM STDIN WITH ({})",
            options.join(", ")
        );
        tracing::debug!("COPY: {sql}");

        let loaded = match request.source {
            LoadSource::File(path) => {
                let mut file = File::open(&path)?;
                self.client.connection().copy_in(&sql, &mut file)?
            }
            LoadSource::Reader(mut reader) => {
                self.client.connection().copy_in(&sql, reader.as_mut())?
            }
            _ => unreachable!("query sources handled above"),
        };

        let message = format!("COPY to {table} completed. {loaded} rows loaded.");
        tracing::info!("{message}");
        Ok(DbResult::ok(message, loaded as i64))
    }

    fn db2_bulk_load(&mut self, table: &str, request: &LoadRequest) -> Result<DbResult, JrmError> {
        let target = match &request.columns {
            Some(columns) => format!("{table} ({})", columns.join(", ")),
            None => table.to_string(),
        };
        let operation = match request.mode {
            LoadMode::Append => "INSERT",
            LoadMode::Replace => "REPLACE",
        };
        let warning_count = request.warning_count;

        let load_cmd = match &request.source {
            LoadSource::Query(query) => format!(
                "LOAD FROM ({query}) OF CURSOR warningcount {warning_count} MESSAGES ON SERVER \
                 {operation} INTO {target}"
            ),
            LoadSource::File(path) => {
                let filetype = if request.format.eq_ignore_ascii_case("csv") {
                    "DEL".to_string()
                } else {
                    request.format.to_ascii_uppercase()
                };
                format!(
                    "LOAD FROM {} OF {filetype} modified by delprioritychar \
                     warningcount {warning_count} MESSAGES ON SERVER {operation} INTO {target}",
                    path.display()
                )
            }
            LoadSource::Reader(_) => {
                return Err(JrmError::Unsupported(
                    "Db2 LOAD reads files on the server; in-memory streams are not loadable"
                        .to_string(),
                ));
            }
            LoadSource::Auto(_) => unreachable!("sources resolved before dispatch"),
        };

        tracing::info!("Loading via ADMIN_CMD: {load_cmd}");
        let row = {
            let mut cursor = self.client.connection().query(
                "CALL SYSPROC.ADMIN_CMD(?)",
                &[DbValue::Text(load_cmd.clone())],
            )?;
            cursor.next_row()?
        };

        let Some(row) = row else {
            return Ok(DbResult {
                status: 1,
                message: "No message returned".to_string(),
                data: Vec::new(),
                columns: Vec::new(),
                count: 0,
            });
        };

        let count = |column: &str| -> i64 {
            row.get(column)
                .or_else(|| row.get(&column.to_ascii_lowercase()))
                .and_then(DbValue::as_int)
                .unwrap_or(0)
        };
        let loaded = count("ROWS_LOADED");
        let rejected = count("ROWS_REJECTED");
        let deleted = count("ROWS_DELETED");

        let (status, message) = if rejected == 0 && deleted == 0 {
            (0, "ADMIN_CMD LOAD completed successfully.".to_string())
        } else if rejected == 0 {
            (1, format!("ADMIN_CMD LOAD completed with DELETED: {deleted}"))
        } else {
            (-1, format!("ADMIN_CMD LOAD completed with REJECTED: {rejected}"))
        };
        match status {
            0 => tracing::info!("{message}"),
            1 => tracing::warn!("{message}"),
            _ => tracing::error!("{message}"),
        }

        Ok(DbResult {
            status,
            message,
            data: vec![row],
            columns: Vec::new(),
            count: loaded,
        })
    }

    fn spark_bulk_load(&mut self, table: &str, request: &LoadRequest) -> Result<DbResult, JrmError> {
        match &request.source {
            LoadSource::Query(query) => Ok(self.insert_select(table, request, &query.clone())),
            LoadSource::File(_) => {
                let loaded = self.client.connection().load_file(table, request)?;
                let message =
                    format!("Bulk load from file into {table} succeeded. {loaded} rows loaded.");
                tracing::info!("{message}");
                Ok(DbResult::ok(message, loaded as i64))
            }
            LoadSource::Reader(_) => Err(JrmError::Unsupported(
                "Spark loads from files or queries, not in-memory streams".to_string(),
            )),
            LoadSource::Auto(_) => unreachable!("sources resolved before dispatch"),
        }
    }

    /// Fallback for backends without a native path: read the delimited
    /// source and issue chunked multi-row INSERTs.
    fn generic_bulk_load(
        &mut self,
        table: &str,
        request: LoadRequest,
    ) -> Result<DbResult, JrmError> {
        let LoadRequest {
            source,
            delimiter,
            header,
            null_value,
            columns,
            ..
        } = request;

        let reader: Box<dyn Read + Send> = match source {
            LoadSource::Query(query) => {
                let sql = match &columns {
                    Some(cols) => format!("INSERT INTO {table} ({}) {query}", cols.join(", ")),
                    None => format!("INSERT INTO {table} {query}"),
                };
                return Ok(self.execute(&sql, ()));
            }
            LoadSource::File(path) => Box::new(File::open(&path)?),
            LoadSource::Reader(reader) => reader,
            LoadSource::Auto(_) => unreachable!("sources resolved before dispatch"),
        };

        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .has_headers(header)
            .from_reader(reader);

        let columns: Vec<String> = match columns {
            Some(columns) => columns,
            None if header => csv_reader
                .headers()?
                .iter()
                .map(str::to_string)
                .collect(),
            None => {
                return Err(JrmError::ConfigError(
                    "generic bulk load needs a column list or a header row".to_string(),
                ));
            }
        };

        let null_marker = null_value.unwrap_or_default();
        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let mut row = Record::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                let field = record.get(i).unwrap_or_default();
                let value = if field == null_marker {
                    DbValue::Null
                } else {
                    DbValue::Text(field.to_string())
                };
                row.set(column.clone(), value);
            }
            rows.push(row);
        }

        Ok(self.insert_bulk(table, &rows, 1000))
    }

    /// Build and run a Db2 EXPORT through ADMIN_CMD.
    pub fn db2_export(&mut self, target_file: &str, filetype: &str, source_select: &str) -> DbResult {
        if self.backend() != BackendType::Db2 {
            return DbResult::failed("db2_export requires a Db2 backend");
        }
        let export_cmd = format!(
            "EXPORT TO {target_file} OF {filetype} FROM ({source_select}) MESSAGES ON SERVER"
        );
        tracing::info!("Exporting via ADMIN_CMD: {export_cmd}");
        self.query("CALL SYSPROC.ADMIN_CMD(?)", vec![DbValue::Text(export_cmd)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_source_detection() {
        let req = LoadRequest::auto("SELECT * FROM src").resolve_source();
        assert!(matches!(req.source, LoadSource::Query(_)));

        let req = LoadRequest::auto("  with cte as (select 1) select * from cte").resolve_source();
        assert!(matches!(req.source, LoadSource::Query(_)));

        let req = LoadRequest::auto("/data/input.csv").resolve_source();
        assert!(matches!(req.source, LoadSource::File(_)));
    }

    #[test]
    fn target_column_split() {
        let (table, columns) = split_target("my_table(c1, c2, c3)");
        assert_eq!(table, "my_table");
        assert_eq!(
            columns,
            Some(vec!["c1".to_string(), "c2".to_string(), "c3".to_string()])
        );

        let (table, columns) = split_target("plain");
        assert_eq!(table, "plain");
        assert!(columns.is_none());
    }
}
