//! The CRUD dispatcher: structured operations compiled to dialect-correct
//! SQL and executed through a borrowed [`Client`].
//!
//! Every public operation returns the standardized [`DbResult`] envelope;
//! driver errors are caught per call and surfaced as `status = -1` with the
//! driver message verbatim. Connector and pool errors, by contrast, are
//! typed errors raised before a `Db` ever exists.

use crate::condition::{self, Condition};
use crate::dialect::{self, Dialect, LimitSyntax, UpsertForm};
use crate::error::JrmError;
use crate::placeholder::{self, Params};
use crate::pool::Client;
use crate::record::Record;
use crate::result::DbResult;
use crate::spark;
use crate::types::{BackendType, DbValue};
use crate::value_format::{BoundValue, prepare};

/// Options for `select`: row limit and ordering.
///
/// `limit: None` applies the configured fetch cap as the query limit.
/// `limit: Some(0)` emits no LIMIT clause at all; the fetch loop still
/// stops at the configured cap.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub limit: Option<u64>,
    /// `"col"` or `"col desc"` entries, joined in order.
    pub order_by: Vec<String>,
}

impl SelectOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by.push(order.into());
        self
    }
}

/// One operation descriptor for [`crate::pool::Pool::execute_batch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    Insert {
        table: String,
        rows: Vec<Record>,
    },
    Update {
        table: String,
        data: Record,
        condition: Option<Condition>,
    },
    Delete {
        table: String,
        condition: Option<Condition>,
    },
    Merge {
        table: String,
        rows: Vec<Record>,
        key_columns: Vec<String>,
        update_columns: Option<Vec<String>>,
        no_update: bool,
    },
    Execute {
        sql: String,
        params: Vec<DbValue>,
    },
}

/// The facade over one borrowed client.
pub struct Db<'c> {
    pub(crate) client: &'c mut Client,
}

impl<'c> Db<'c> {
    pub fn new(client: &'c mut Client) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn backend(&self) -> BackendType {
        self.client.backend()
    }

    fn dialect(&self) -> &'static Dialect {
        self.client.dialect()
    }

    /// `SELECT <cols> FROM <table> [WHERE ...] [ORDER BY ...] [LIMIT n]`.
    pub fn select(
        &mut self,
        table: &str,
        columns: &[&str],
        condition: Option<&Condition>,
        options: Option<&SelectOptions>,
    ) -> DbResult {
        match self.try_select(table, columns, condition, options) {
            Ok(result) => result,
            Err(e) => DbResult::from_error("select", &e),
        }
    }

    fn try_select(
        &mut self,
        table: &str,
        columns: &[&str],
        condition: Option<&Condition>,
        options: Option<&SelectOptions>,
    ) -> Result<DbResult, JrmError> {
        let dialect = self.dialect();
        let column_list = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.join(", ")
        };

        let compiled = condition::compile(condition, dialect, 1)?;

        let order = options
            .filter(|o| !o.order_by.is_empty())
            .map(|o| format!(" ORDER BY {}", o.order_by.join(", ")))
            .unwrap_or_default();

        // None -> configured cap; Some(0) -> no LIMIT clause.
        let limit = match options.and_then(|o| o.limit) {
            None => Some(self.client.fetch_limit()),
            Some(0) => None,
            Some(n) => Some(n),
        };

        let sql = match (dialect.limit, limit) {
            (LimitSyntax::Top, Some(n)) => format!(
                "SELECT TOP {n} {column_list} FROM {table}{}{order}",
                compiled.clause
            ),
            (LimitSyntax::Limit, Some(n)) => format!(
                "SELECT {column_list} FROM {table}{}{order} LIMIT {n}",
                compiled.clause
            ),
            (LimitSyntax::FetchFirst, Some(n)) => format!(
                "SELECT {column_list} FROM {table}{}{order} FETCH FIRST {n} ROWS ONLY",
                compiled.clause
            ),
            (_, None) => format!(
                "SELECT {column_list} FROM {table}{}{order}",
                compiled.clause
            ),
        };

        let cap = limit.unwrap_or(self.client.fetch_limit());
        let (data, out_columns) = self.run_query(&sql, &compiled.values, cap)?;
        let message = format!("Query completed successfully. {} rows returned.", data.len());
        tracing::info!("{message}");
        Ok(DbResult::rows(message, data, out_columns))
    }

    /// Raw SELECT with placeholder normalization; returns rows up to the
    /// configured fetch cap.
    pub fn query(&mut self, sql: &str, params: impl Into<Params>) -> DbResult {
        let params = params.into();
        match self.try_query(sql, &params) {
            Ok(result) => result,
            Err(e) => DbResult::from_error("query", &e),
        }
    }

    fn try_query(&mut self, sql: &str, params: &Params) -> Result<DbResult, JrmError> {
        let dialect = self.dialect();
        let (sql, values) = placeholder::bind(sql, params, dialect.placeholder)?;
        let cap = self.client.fetch_limit();
        let (data, columns) = self.run_query(&sql, &values, cap)?;
        let message = format!("Query completed successfully. {} rows returned.", data.len());
        tracing::info!("{message}");
        Ok(DbResult::rows(message, data, columns))
    }

    /// Raw DML/DDL with placeholder normalization; `count` is the driver's
    /// affected-row count.
    pub fn execute(&mut self, sql: &str, params: impl Into<Params>) -> DbResult {
        let params = params.into();
        match self.try_execute(sql, &params) {
            Ok(result) => result,
            Err(e) => DbResult::from_error("execute", &e),
        }
    }

    fn try_execute(&mut self, sql: &str, params: &Params) -> Result<DbResult, JrmError> {
        let dialect = self.dialect();
        let (sql, values) = placeholder::bind(sql, params, dialect.placeholder)?;
        tracing::debug!("Execute: {sql}");
        let affected = self.client.connection().execute(&sql, &values)?;
        let message = format!("SQL statement succeeded. {affected} rows affected.");
        tracing::info!("{message}");
        Ok(DbResult::ok(message, affected as i64))
    }

    /// Insert one record. `return_columns` adds a RETURNING clause on
    /// backends that support it (PostgreSQL); elsewhere it is ignored with
    /// a warning.
    pub fn insert(
        &mut self,
        table: &str,
        data: &Record,
        return_columns: Option<&[&str]>,
    ) -> DbResult {
        match self.try_insert(table, data, return_columns) {
            Ok(result) => result,
            Err(e) => DbResult::from_error("insert", &e),
        }
    }

    pub(crate) fn try_insert(
        &mut self,
        table: &str,
        data: &Record,
        return_columns: Option<&[&str]>,
    ) -> Result<DbResult, JrmError> {
        if data.is_empty() {
            return Ok(DbResult::failed("insert: no data supplied"));
        }
        let dialect = self.dialect();
        let columns: Vec<String> = data.columns().map(str::to_string).collect();
        let mut values = Vec::new();
        let mut index = 1;
        let fragment = row_fragment(data, &columns, dialect, &mut index, &mut values);
        let column_list = columns.join(", ");
        let mut sql = format!("INSERT INTO {table} ({column_list}) VALUES {fragment}");

        if let Some(cols) = return_columns {
            if dialect.supports_returning {
                sql.push_str(&format!(" RETURNING {}", cols.join(", ")));
                tracing::debug!("Insert: {sql}");
                let (data, out_columns) = self.run_query(&sql, &values, 0)?;
                let message = format!("INSERT succeeded. 1 row inserted into {table}.");
                tracing::info!("{message}");
                return Ok(DbResult::rows(message, data, out_columns));
            }
            tracing::warn!(
                "return_columns ignored: {} does not support RETURNING",
                dialect.backend
            );
        }

        tracing::debug!("Insert: {sql}");
        self.client.connection().execute(&sql, &values)?;
        let message = format!("INSERT succeeded. 1 row inserted into {table}.");
        tracing::info!("{message}");
        Ok(DbResult::ok(message, 1))
    }

    /// Multi-row insert in chunks of `bulk_size` (default 1000 when 0).
    /// The column set comes from the first record; rows missing a column
    /// bind NULL for it. `count` is the total rows sent.
    pub fn insert_bulk(&mut self, table: &str, rows: &[Record], bulk_size: usize) -> DbResult {
        match self.try_insert_bulk(table, rows, bulk_size) {
            Ok(result) => result,
            Err(e) => DbResult::from_error("bulk insert", &e),
        }
    }

    fn try_insert_bulk(
        &mut self,
        table: &str,
        rows: &[Record],
        bulk_size: usize,
    ) -> Result<DbResult, JrmError> {
        if rows.is_empty() {
            return Ok(DbResult::ok("No data to insert", 0));
        }
        let dialect = self.dialect();
        let columns: Vec<String> = rows[0].columns().map(str::to_string).collect();
        let column_list = columns.join(", ");
        let chunk_size = if bulk_size == 0 { 1000 } else { bulk_size };

        let mut total = 0u64;
        for chunk in rows.chunks(chunk_size) {
            let mut values = Vec::new();
            let mut index = 1;
            let fragments: Vec<String> = chunk
                .iter()
                .map(|row| row_fragment(row, &columns, dialect, &mut index, &mut values))
                .collect();
            let sql = format!(
                "INSERT INTO {table} ({column_list}) VALUES {}",
                fragments.join(", ")
            );
            tracing::debug!("Bulk insert chunk of {} rows", chunk.len());
            self.client.connection().execute(&sql, &values)?;
            total += chunk.len() as u64;
        }

        let message = format!("BULK INSERT succeeded. {total} rows inserted into {table}.");
        tracing::info!("{message}");
        Ok(DbResult::ok(message, total as i64))
    }

    /// `UPDATE <table> SET ... [WHERE ...]`. A `None` condition updates all
    /// rows; that is the caller's responsibility.
    pub fn update(&mut self, table: &str, data: &Record, condition: Option<&Condition>) -> DbResult {
        if self.backend() == BackendType::Spark {
            return spark::update(self.client, table, data, condition);
        }
        match self.try_update(table, data, condition) {
            Ok(result) => result,
            Err(e) => DbResult::from_error("update", &e),
        }
    }

    fn try_update(
        &mut self,
        table: &str,
        data: &Record,
        condition: Option<&Condition>,
    ) -> Result<DbResult, JrmError> {
        if data.is_empty() {
            return Ok(DbResult::failed("update: no data supplied"));
        }
        let dialect = self.dialect();
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

        let compiled = condition::compile(condition, dialect, index)?;
        values.extend(compiled.values);

        let sql = format!("UPDATE {table} SET {}{}", sets.join(", "), compiled.clause);
        tracing::debug!("Update: {sql}");
        let affected = self.client.connection().execute(&sql, &values)?;
        let message = format!("UPDATE {table} succeeded. {affected} rows affected.");
        tracing::info!("{message}");
        Ok(DbResult::ok(message, affected as i64))
    }

    /// `DELETE FROM <table> [WHERE ...]`. A `None` condition deletes all
    /// rows.
    pub fn delete(&mut self, table: &str, condition: Option<&Condition>) -> DbResult {
        if self.backend() == BackendType::Spark {
            return spark::delete(self.client, table, condition);
        }
        match self.try_delete(table, condition) {
            Ok(result) => result,
            Err(e) => DbResult::from_error("delete", &e),
        }
    }

    fn try_delete(
        &mut self,
        table: &str,
        condition: Option<&Condition>,
    ) -> Result<DbResult, JrmError> {
        let dialect = self.dialect();
        let compiled = condition::compile(condition, dialect, 1)?;
        let sql = format!("DELETE FROM {table}{}", compiled.clause);
        tracing::debug!("Delete: {sql}");
        let affected = self.client.connection().execute(&sql, &compiled.values)?;
        let message = format!("DELETE from {table} succeeded. {affected} rows affected.");
        tracing::info!("{message}");
        Ok(DbResult::ok(message, affected as i64))
    }

    /// Upsert rows keyed on `key_columns`, rendered in the dialect's upsert
    /// form. `update_columns` defaults to all data columns minus the keys;
    /// `no_update` keeps existing rows untouched.
    pub fn merge(
        &mut self,
        table: &str,
        rows: &[Record],
        key_columns: &[&str],
        update_columns: Option<&[&str]>,
        no_update: bool,
    ) -> DbResult {
        if self.backend() == BackendType::Spark {
            return spark::merge(self.client, table, rows, key_columns, update_columns, no_update);
        }
        match self.try_merge(table, rows, key_columns, update_columns, no_update) {
            Ok(result) => result,
            Err(e) => DbResult::from_error("merge", &e),
        }
    }

    fn try_merge(
        &mut self,
        table: &str,
        rows: &[Record],
        key_columns: &[&str],
        update_columns: Option<&[&str]>,
        no_update: bool,
    ) -> Result<DbResult, JrmError> {
        if rows.is_empty() {
            return Ok(DbResult::ok("No data to merge", 0));
        }
        let plan = MergePlan::build(rows, key_columns, update_columns)?;
        let dialect = self.dialect();

        // SQL Server caps bind parameters at 2100 per statement; keep each
        // chunk comfortably under that.
        let chunk_size = match dialect.backend {
            BackendType::SqlServer => (2000 / plan.columns.len().max(1)).clamp(1, 1000),
            _ => 1000,
        };

        let mut affected = 0u64;
        for chunk in rows.chunks(chunk_size) {
            affected += match dialect.upsert {
                UpsertForm::OnConflict | UpsertForm::OnDuplicateKey => {
                    let mut values = Vec::new();
                    let mut index = 1;
                    let fragments: Vec<String> = chunk
                        .iter()
                        .map(|row| row_fragment(row, &plan.columns, dialect, &mut index, &mut values))
                        .collect();
                    let tail = dialect::upsert_tail(
                        dialect,
                        &plan.key_columns,
                        &plan.update_columns,
                        no_update,
                    )?;
                    let sql = format!(
                        "INSERT INTO {table} ({}) VALUES {} {tail}",
                        plan.columns.join(", "),
                        fragments.join(", ")
                    );
                    tracing::debug!("Merge: {sql}");
                    self.client.connection().execute(&sql, &values)?
                }
                UpsertForm::MergeInto => {
                    let mut values = Vec::new();
                    let mut index = 1;
                    let fragments: Vec<String> = chunk
                        .iter()
                        .map(|row| row_fragment(row, &plan.columns, dialect, &mut index, &mut values))
                        .collect();
                    let sql = dialect::merge_into_sql(
                        dialect,
                        table,
                        &plan.columns,
                        &plan.key_columns,
                        &plan.update_columns,
                        no_update,
                        &fragments,
                    );
                    tracing::debug!("Merge: {sql}");
                    self.client.connection().execute(&sql, &values)?
                }
            };
        }

        let message = format!("MERGE table {table} succeeded. {affected} rows affected.");
        tracing::info!("{message}");
        Ok(DbResult::ok(message, affected as i64))
    }

    /// Merge rows produced by a SELECT into a target table: the
    /// source-query form of `merge`, for moving data between tables on the
    /// same connection.
    pub fn merge_select(
        &mut self,
        target_table: &str,
        source_select: &str,
        insert_columns: &[&str],
        key_columns: &[&str],
        update_columns: Option<&[&str]>,
    ) -> DbResult {
        match self.try_merge_select(
            target_table,
            source_select,
            insert_columns,
            key_columns,
            update_columns,
        ) {
            Ok(result) => result,
            Err(e) => DbResult::from_error("merge_select", &e),
        }
    }

    fn try_merge_select(
        &mut self,
        target_table: &str,
        source_select: &str,
        insert_columns: &[&str],
        key_columns: &[&str],
        update_columns: Option<&[&str]>,
    ) -> Result<DbResult, JrmError> {
        if key_columns.is_empty() {
            return Ok(DbResult::failed("merge_select: key_columns cannot be empty"));
        }
        let dialect = self.dialect();
        let columns: Vec<String> = insert_columns.iter().map(|s| s.to_string()).collect();
        let keys: Vec<String> = key_columns.iter().map(|s| s.to_string()).collect();
        let updates: Vec<String> = match update_columns {
            Some(cols) => cols.iter().map(|s| s.to_string()).collect(),
            None => columns.iter().filter(|c| !keys.contains(c)).cloned().collect(),
        };
        let column_list = columns.join(", ");

        let sql = match dialect.upsert {
            UpsertForm::OnConflict | UpsertForm::OnDuplicateKey => {
                let tail = dialect::upsert_tail(dialect, &keys, &updates, false)?;
                format!("INSERT INTO {target_table} ({column_list}) {source_select} {tail}")
            }
            UpsertForm::MergeInto => {
                let on = keys
                    .iter()
                    .map(|key| format!("target.{key} = src.{key}"))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let sets = updates
                    .iter()
                    .map(|col| format!("target.{col} = src.{col}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let insert_values = columns
                    .iter()
                    .map(|col| format!("src.{col}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut sql = format!(
                    "MERGE INTO {target_table} AS target USING ({source_select}) AS src ON ({on})"
                );
                if !sets.is_empty() {
                    sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {sets}"));
                }
                sql.push_str(&format!(
                    " WHEN NOT MATCHED THEN INSERT ({column_list}) VALUES ({insert_values})"
                ));
                match dialect.backend {
                    BackendType::Db2 => sql.push_str(" ELSE IGNORE"),
                    BackendType::SqlServer => sql.push(';'),
                    _ => {}
                }
                sql
            }
        };

        tracing::debug!("Merge select: {sql}");
        let affected = self.client.connection().execute(&sql, &[])?;
        let message =
            format!("MERGE into {target_table} succeeded. {affected} rows affected.");
        tracing::info!("{message}");
        Ok(DbResult::ok(message, affected as i64))
    }

    /// Apply one batch operation descriptor.
    pub(crate) fn apply(&mut self, op: &BatchOp) -> DbResult {
        match op {
            BatchOp::Insert { table, rows } => match rows.len() {
                1 => self.insert(table, &rows[0], None),
                _ => self.insert_bulk(table, rows, 0),
            },
            BatchOp::Update {
                table,
                data,
                condition,
            } => self.update(table, data, condition.as_ref()),
            BatchOp::Delete { table, condition } => self.delete(table, condition.as_ref()),
            BatchOp::Merge {
                table,
                rows,
                key_columns,
                update_columns,
                no_update,
            } => {
                let keys: Vec<&str> = key_columns.iter().map(String::as_str).collect();
                let updates: Option<Vec<&str>> = update_columns
                    .as_ref()
                    .map(|cols| cols.iter().map(String::as_str).collect());
                self.merge(table, rows, &keys, updates.as_deref(), *no_update)
            }
            BatchOp::Execute { sql, params } => self.execute(sql, params.clone()),
        }
    }

    pub(crate) fn run_query(
        &mut self,
        sql: &str,
        values: &[DbValue],
        cap: u64,
    ) -> Result<(Vec<Record>, Vec<String>), JrmError> {
        tracing::debug!("Query: {sql}");
        let mut cursor = self.client.connection().query(sql, values)?;
        let columns = cursor.columns();
        let mut data = Vec::new();
        while cap == 0 || (data.len() as u64) < cap {
            match cursor.next_row()? {
                Some(record) => data.push(record),
                None => break,
            }
        }
        Ok((data, columns))
    }
}

/// Shared validation and column planning for merge operations.
pub(crate) struct MergePlan {
    pub columns: Vec<String>,
    pub key_columns: Vec<String>,
    pub update_columns: Vec<String>,
}

impl MergePlan {
    pub(crate) fn build(
        rows: &[Record],
        key_columns: &[&str],
        update_columns: Option<&[&str]>,
    ) -> Result<Self, JrmError> {
        if key_columns.is_empty() {
            return Err(JrmError::MalformedCondition(
                "key_columns cannot be empty for merge".to_string(),
            ));
        }
        let columns: Vec<String> = rows[0].columns().map(str::to_string).collect();
        for key in key_columns {
            if !rows[0].contains(key) {
                return Err(JrmError::MalformedCondition(format!(
                    "key column '{key}' not found in data"
                )));
            }
        }
        let key_columns: Vec<String> = key_columns.iter().map(|s| s.to_string()).collect();
        let update_columns: Vec<String> = match update_columns {
            Some(cols) => cols.iter().map(|s| s.to_string()).collect(),
            None => columns
                .iter()
                .filter(|c| !key_columns.contains(c))
                .cloned()
                .collect(),
        };
        Ok(Self {
            columns,
            key_columns,
            update_columns,
        })
    }
}

/// Render one record as a parenthesized VALUES tuple against the planned
/// column list. Keyword literals inline; missing columns bind NULL.
pub(crate) fn row_fragment(
    record: &Record,
    columns: &[String],
    dialect: &Dialect,
    index: &mut usize,
    values: &mut Vec<DbValue>,
) -> String {
    let mut parts = Vec::with_capacity(columns.len());
    for column in columns {
        let value = record.get(column).cloned().unwrap_or(DbValue::Null);
        match prepare(&value) {
            BoundValue::Inline(literal) => parts.push(literal),
            BoundValue::Bind(bound) => {
                parts.push(dialect.placeholder(*index));
                *index += 1;
                values.push(bound);
            }
        }
    }
    format!("({})", parts.join(", "))
}
