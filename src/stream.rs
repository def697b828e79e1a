//! Streaming: lazy row and batch iteration over query results, and
//! periodic-commit stream writers for large mutations.
//!
//! Streams are finite, non-restartable iterators yielding tagged elements.
//! The error budget is shared by every streaming entry point: `0` tolerates
//! any number of per-row errors, a negative budget aborts on the first, and
//! a positive budget aborts once that many rows have failed.

use crate::condition::Condition;
use crate::db::{Db, row_fragment};
use crate::driver::SqlCursor;
use crate::error::JrmError;
use crate::placeholder::{self, Params};
use crate::record::Record;
use crate::result::DbResult;
use crate::value_format::{BoundValue, prepare};

/// Outcome tag on a streamed element.
#[derive(Debug, Clone, PartialEq)]
pub enum RowStatus {
    Ok,
    /// This row failed to decode; the stream continues.
    Error(String),
    /// The error budget is spent; this is the stream's final element.
    Aborted(String),
}

/// One streamed row: 1-based index, payload, status.
#[derive(Debug, Clone)]
pub struct StreamRow {
    pub index: u64,
    pub record: Record,
    pub status: RowStatus,
}

/// One streamed batch: cumulative row count, payload, status.
#[derive(Debug, Clone)]
pub struct StreamBatch {
    pub count: u64,
    pub rows: Vec<Record>,
    pub status: RowStatus,
}

/// Row-by-row stream over a query.
pub struct QueryStream<'a> {
    cursor: Box<dyn SqlCursor + 'a>,
    columns: Vec<String>,
    index: u64,
    errors: i64,
    max_errors: i64,
    consecutive_errors: u32,
    done: bool,
}

impl QueryStream<'_> {
    /// Column names, available before the first row (CSV headers need
    /// them).
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn budget_spent(&self) -> bool {
        self.max_errors < 0 || (self.max_errors > 0 && self.errors >= self.max_errors)
    }
}

impl Iterator for QueryStream<'_> {
    type Item = StreamRow;

    fn next(&mut self) -> Option<StreamRow> {
        if self.done {
            return None;
        }
        match self.cursor.next_row() {
            Ok(Some(record)) => {
                self.index += 1;
                self.consecutive_errors = 0;
                Some(StreamRow {
                    index: self.index,
                    record,
                    status: RowStatus::Ok,
                })
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.index += 1;
                self.errors += 1;
                self.consecutive_errors += 1;
                // A second consecutive fetch error means the cursor itself
                // is dead, not just one row.
                if self.budget_spent() || self.consecutive_errors > 1 {
                    self.done = true;
                    tracing::error!("stream aborted at row {}: {e}", self.index);
                    Some(StreamRow {
                        index: self.index,
                        record: Record::new(),
                        status: RowStatus::Aborted(e.to_string()),
                    })
                } else {
                    tracing::warn!("stream row {} failed: {e}", self.index);
                    Some(StreamRow {
                        index: self.index,
                        record: Record::new(),
                        status: RowStatus::Error(e.to_string()),
                    })
                }
            }
        }
    }
}

/// Batch stream over a query.
pub struct BatchStream<'a> {
    inner: QueryStream<'a>,
    batch_size: usize,
}

impl BatchStream<'_> {
    #[must_use]
    pub fn columns(&self) -> &[String] {
        self.inner.columns()
    }
}

impl Iterator for BatchStream<'_> {
    type Item = StreamBatch;

    fn next(&mut self) -> Option<StreamBatch> {
        let mut rows = Vec::with_capacity(self.batch_size);
        while rows.len() < self.batch_size {
            match self.inner.next() {
                Some(StreamRow {
                    status: RowStatus::Ok,
                    record,
                    ..
                }) => rows.push(record),
                Some(StreamRow {
                    status: RowStatus::Error(_),
                    ..
                }) => continue,
                Some(StreamRow {
                    status: RowStatus::Aborted(message),
                    ..
                }) => {
                    return Some(StreamBatch {
                        count: self.inner.index,
                        rows,
                        status: RowStatus::Aborted(message),
                    });
                }
                None => break,
            }
        }
        if rows.is_empty() {
            return None;
        }
        Some(StreamBatch {
            count: self.inner.index,
            rows,
            status: RowStatus::Ok,
        })
    }
}

/// Tuning for the stream writers.
#[derive(Debug, Clone)]
pub struct StreamWriteOptions {
    /// Commit after this many applied rows (default 10 000).
    pub commit_every: u64,
    pub max_errors: i64,
}

impl Default for StreamWriteOptions {
    fn default() -> Self {
        Self {
            commit_every: 10_000,
            max_errors: 0,
        }
    }
}

enum WriteOp<'x> {
    Insert,
    Update {
        key_columns: &'x [&'x str],
    },
    Merge {
        key_columns: &'x [&'x str],
        update_columns: Option<&'x [&'x str]>,
        no_update: bool,
    },
}

impl Db<'_> {
    /// Stream a query row by row.
    ///
    /// # Errors
    ///
    /// Binding or driver errors while opening the stream; per-row errors
    /// are reported in the yielded elements instead.
    pub fn stream_query(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
        max_errors: i64,
    ) -> Result<QueryStream<'_>, JrmError> {
        let params = params.into();
        let (sql, values) = placeholder::bind(sql, &params, self.client.dialect().placeholder)?;
        tracing::debug!("Stream query: {sql}");
        let cursor = self.client.connection().query(&sql, &values)?;
        let columns = cursor.columns();
        Ok(QueryStream {
            cursor,
            columns,
            index: 0,
            errors: 0,
            max_errors,
            consecutive_errors: 0,
            done: false,
        })
    }

    /// Stream a query in batches of `batch_size` records.
    ///
    /// # Errors
    ///
    /// Same as [`Db::stream_query`].
    pub fn stream_query_batch(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
        batch_size: usize,
        max_errors: i64,
    ) -> Result<BatchStream<'_>, JrmError> {
        Ok(BatchStream {
            inner: self.stream_query(sql, params, max_errors)?,
            batch_size: batch_size.max(1),
        })
    }

    /// Consume a record iterator and insert each row, committing every
    /// `commit_every` rows.
    pub fn stream_insert(
        &mut self,
        source: impl IntoIterator<Item = Record>,
        table: &str,
        options: &StreamWriteOptions,
    ) -> DbResult {
        self.stream_write(source, table, &WriteOp::Insert, options)
    }

    /// Consume a record iterator and update rows keyed on `key_columns`;
    /// non-key fields become the SET clause.
    pub fn stream_update(
        &mut self,
        source: impl IntoIterator<Item = Record>,
        table: &str,
        key_columns: &[&str],
        options: &StreamWriteOptions,
    ) -> DbResult {
        self.stream_write(source, table, &WriteOp::Update { key_columns }, options)
    }

    /// Consume a record iterator and upsert each row. `no_update` is
    /// honored exactly as in [`Db::merge`].
    pub fn stream_merge(
        &mut self,
        source: impl IntoIterator<Item = Record>,
        table: &str,
        key_columns: &[&str],
        update_columns: Option<&[&str]>,
        no_update: bool,
        options: &StreamWriteOptions,
    ) -> DbResult {
        self.stream_write(
            source,
            table,
            &WriteOp::Merge {
                key_columns,
                update_columns,
                no_update,
            },
            options,
        )
    }

    fn stream_write(
        &mut self,
        source: impl IntoIterator<Item = Record>,
        table: &str,
        op: &WriteOp<'_>,
        options: &StreamWriteOptions,
    ) -> DbResult {
        let commit_every = options.commit_every.max(1);
        if let Err(e) = self.client.connection().set_autocommit(false) {
            return DbResult::from_error("stream write", &e);
        }

        let mut total = 0u64;
        let mut committed = 0u64;
        let mut window = 0u64;
        let mut errors = 0i64;

        for record in source {
            match self.write_one(table, &record, op) {
                Ok(()) => {
                    total += 1;
                    window += 1;
                    if window >= commit_every {
                        if let Err(e) = self.client.connection().commit() {
                            return self.abort_stream(committed, &e.to_string());
                        }
                        committed += window;
                        window = 0;
                        tracing::debug!("stream write committed {committed} rows");
                    }
                }
                Err(e) => {
                    errors += 1;
                    tracing::warn!("stream write row failed: {e}");
                    let spent =
                        options.max_errors < 0 || (options.max_errors > 0 && errors >= options.max_errors);
                    if spent {
                        return self.abort_stream(committed, &e.to_string());
                    }
                }
            }
        }

        if let Err(e) = self.client.connection().commit() {
            return self.abort_stream(committed, &e.to_string());
        }
        if let Err(e) = self.client.connection().set_autocommit(true) {
            tracing::warn!("autocommit restore after stream write failed: {e}");
        }

        let message = format!(
            "Stream write to {table} completed. {total} rows applied, {errors} errors."
        );
        tracing::info!("{message}");
        DbResult::ok(message, total as i64)
    }

    /// Roll back the open window and report the abort; rows committed in
    /// earlier windows stay.
    fn abort_stream(&mut self, committed: u64, message: &str) -> DbResult {
        if let Err(e) = self.client.connection().rollback() {
            tracing::warn!("rollback after stream abort failed: {e}");
        }
        if let Err(e) = self.client.connection().set_autocommit(true) {
            tracing::warn!("autocommit restore after stream abort failed: {e}");
        }
        let err = JrmError::StreamAborted {
            rows: committed,
            message: message.to_string(),
        };
        let mut result = DbResult::from_error("stream write", &err);
        result.count = committed as i64;
        result
    }

    fn write_one(&mut self, table: &str, record: &Record, op: &WriteOp<'_>) -> Result<(), JrmError> {
        if record.is_empty() {
            return Err(JrmError::MalformedBinding("empty record in stream".to_string()));
        }
        let dialect = self.client.dialect();
        match op {
            WriteOp::Insert => {
                let columns: Vec<String> = record.columns().map(str::to_string).collect();
                let mut values = Vec::new();
                let mut index = 1;
                let fragment = row_fragment(record, &columns, dialect, &mut index, &mut values);
                let sql = format!(
                    "INSERT INTO {table} ({}) VALUES {fragment}",
                    columns.join(", ")
                );
                self.client.connection().execute(&sql, &values)?;
            }
            WriteOp::Update { key_columns } => {
                let mut data = Record::new();
                let mut condition = Condition::new();
                for (column, value) in record.iter() {
                    if key_columns.contains(&column) {
                        condition = condition.eq(column, value.clone());
                    } else {
                        data.set(column, value.clone());
                    }
                }
                if data.is_empty() {
                    return Err(JrmError::MalformedBinding(
                        "stream update record has no non-key fields".to_string(),
                    ));
                }
                let mut values = Vec::new();
                let mut index = 1;
                let mut sets = Vec::with_capacity(data.len());
                for (column, value) in data.iter() {
                    match prepare(value) {
                        BoundValue::Inline(literal) => sets.push(format!("{column} = {literal}")),
                        BoundValue::Bind(bound) => {
                            sets.push(format!("{column} = {}", dialect.placeholder(index)));
                            index += 1;
                            values.push(bound);
                        }
                    }
                }
                let compiled = crate::condition::compile(Some(&condition), dialect, index)?;
                values.extend(compiled.values);
                let sql = format!("UPDATE {table} SET {}{}", sets.join(", "), compiled.clause);
                self.client.connection().execute(&sql, &values)?;
            }
            WriteOp::Merge {
                key_columns,
                update_columns,
                no_update,
            } => {
                let rows = std::slice::from_ref(record);
                let result = self.merge(table, rows, key_columns, *update_columns, *no_update);
                if !result.is_ok() {
                    return Err(JrmError::SqlError(result.message));
                }
            }
        }
        Ok(())
    }
}
