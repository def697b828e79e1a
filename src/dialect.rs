//! Per-backend dialect descriptors.
//!
//! A [`Dialect`] is the immutable value that drives SQL generation for one
//! backend: placeholder style, identifier quoting, limit syntax, upsert
//! form, autocommit default and cursor strategy. Descriptors are static and
//! freely shared; dispatch reads the backend tag and nothing else.

use crate::error::JrmError;
use crate::placeholder::PlaceholderStyle;
use crate::types::BackendType;

/// How the backend bounds result sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSyntax {
    /// Trailing `LIMIT n`
    Limit,
    /// `SELECT TOP n ...` (SQL Server)
    Top,
    /// Trailing `FETCH FIRST n ROWS ONLY` (Oracle, Db2)
    FetchFirst,
}

/// The upsert statement family the backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertForm {
    /// `INSERT ... ON CONFLICT (keys) DO UPDATE SET ...` (PostgreSQL, SQLite)
    OnConflict,
    /// `INSERT ... ON DUPLICATE KEY UPDATE ...` (MySQL/MariaDB)
    OnDuplicateKey,
    /// `MERGE INTO target USING (VALUES ...) AS src ON ...`
    MergeInto,
}

#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    pub backend: BackendType,
    pub placeholder: PlaceholderStyle,
    /// Identifier quote pair, e.g. `("\"", "\"")` or `("[", "]")`.
    pub quote: (&'static str, &'static str),
    pub limit: LimitSyntax,
    /// Whether `INSERT ... RETURNING` is available (PostgreSQL only).
    pub supports_returning: bool,
    pub upsert: UpsertForm,
    pub autocommit_default: bool,
    /// Whether the driver can stream from a server-side cursor; without it
    /// the streaming engine falls back to a client-side fetch loop.
    pub server_side_cursor: bool,
}

impl Dialect {
    /// Render the bind placeholder for 1-based position `index`.
    #[must_use]
    pub fn placeholder(&self, index: usize) -> String {
        self.placeholder.render(index)
    }

    /// Quote an identifier with the backend's quote characters.
    #[must_use]
    pub fn quote_ident(&self, name: &str) -> String {
        let (open, close) = self.quote;
        format!("{open}{name}{close}")
    }
}

static POSTGRES: Dialect = Dialect {
    backend: BackendType::Postgres,
    placeholder: PlaceholderStyle::Dollar,
    quote: ("\"", "\""),
    limit: LimitSyntax::Limit,
    supports_returning: true,
    upsert: UpsertForm::OnConflict,
    autocommit_default: true,
    server_side_cursor: true,
};

static MYSQL: Dialect = Dialect {
    backend: BackendType::Mysql,
    placeholder: PlaceholderStyle::Question,
    quote: ("`", "`"),
    limit: LimitSyntax::Limit,
    supports_returning: false,
    upsert: UpsertForm::OnDuplicateKey,
    autocommit_default: true,
    server_side_cursor: true,
};

static SQLITE: Dialect = Dialect {
    backend: BackendType::Sqlite,
    placeholder: PlaceholderStyle::Question,
    quote: ("\"", "\""),
    limit: LimitSyntax::Limit,
    supports_returning: false,
    upsert: UpsertForm::OnConflict,
    autocommit_default: true,
    server_side_cursor: false,
};

static ORACLE: Dialect = Dialect {
    backend: BackendType::Oracle,
    placeholder: PlaceholderStyle::ColonNumbered,
    quote: ("\"", "\""),
    limit: LimitSyntax::FetchFirst,
    supports_returning: false,
    upsert: UpsertForm::MergeInto,
    autocommit_default: true,
    server_side_cursor: true,
};

static DB2: Dialect = Dialect {
    backend: BackendType::Db2,
    placeholder: PlaceholderStyle::Question,
    quote: ("\"", "\""),
    limit: LimitSyntax::FetchFirst,
    supports_returning: false,
    upsert: UpsertForm::MergeInto,
    autocommit_default: true,
    server_side_cursor: true,
};

static SQLSERVER: Dialect = Dialect {
    backend: BackendType::SqlServer,
    placeholder: PlaceholderStyle::Question,
    quote: ("[", "]"),
    limit: LimitSyntax::Top,
    supports_returning: false,
    upsert: UpsertForm::MergeInto,
    autocommit_default: true,
    server_side_cursor: false,
};

static SPARK: Dialect = Dialect {
    backend: BackendType::Spark,
    placeholder: PlaceholderStyle::Question,
    quote: ("`", "`"),
    limit: LimitSyntax::Limit,
    supports_returning: false,
    upsert: UpsertForm::MergeInto,
    // Spark sessions have no transactions; the connection reports
    // autocommit on and commit/rollback are no-ops.
    autocommit_default: true,
    server_side_cursor: false,
};

static GENERIC: Dialect = Dialect {
    backend: BackendType::Generic,
    placeholder: PlaceholderStyle::Question,
    quote: ("\"", "\""),
    limit: LimitSyntax::Limit,
    supports_returning: false,
    upsert: UpsertForm::MergeInto,
    autocommit_default: true,
    server_side_cursor: false,
};

/// Look up the static descriptor for a backend.
#[must_use]
pub fn lookup(backend: BackendType) -> &'static Dialect {
    match backend {
        BackendType::Postgres => &POSTGRES,
        BackendType::Mysql => &MYSQL,
        BackendType::Sqlite => &SQLITE,
        BackendType::Oracle => &ORACLE,
        BackendType::Db2 => &DB2,
        BackendType::SqlServer => &SQLSERVER,
        BackendType::Spark => &SPARK,
        BackendType::Generic => &GENERIC,
    }
}

/// Build the upsert tail appended to an INSERT for `OnConflict` and
/// `OnDuplicateKey` dialects.
///
/// # Errors
///
/// `Unsupported` for `MergeInto` dialects, which need a full MERGE statement
/// instead of an INSERT tail.
pub(crate) fn upsert_tail(
    dialect: &Dialect,
    key_columns: &[String],
    update_columns: &[String],
    no_update: bool,
) -> Result<String, JrmError> {
    match dialect.upsert {
        UpsertForm::OnConflict => {
            let conflict = key_columns.join(", ");
            if no_update || update_columns.is_empty() {
                Ok(format!("ON CONFLICT ({conflict}) DO NOTHING"))
            } else {
                let sets = update_columns
                    .iter()
                    .map(|col| format!("{col} = EXCLUDED.{col}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(format!("ON CONFLICT ({conflict}) DO UPDATE SET {sets}"))
            }
        }
        UpsertForm::OnDuplicateKey => {
            if no_update || update_columns.is_empty() {
                // No assignment form exists; a self-assignment of the first
                // key column makes the statement a no-op on duplicates.
                let key = &key_columns[0];
                Ok(format!("ON DUPLICATE KEY UPDATE {key} = {key}"))
            } else {
                let sets = update_columns
                    .iter()
                    .map(|col| format!("{col} = VALUES({col})"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(format!("ON DUPLICATE KEY UPDATE {sets}"))
            }
        }
        UpsertForm::MergeInto => Err(JrmError::Unsupported(
            format!("{} upserts use MERGE INTO, not an INSERT tail", dialect.backend),
        )),
    }
}

/// Build a full `MERGE INTO ... USING (VALUES ...)` statement for the
/// `MergeInto` dialects. `row_fragments` are the pre-rendered per-row value
/// tuples, placeholders and keyword literals included.
pub(crate) fn merge_into_sql(
    dialect: &Dialect,
    table: &str,
    columns: &[String],
    key_columns: &[String],
    update_columns: &[String],
    no_update: bool,
    row_fragments: &[String],
) -> String {
    let column_list = columns.join(", ");
    let rows = row_fragments.join(", ");

    // Db2 requires the TABLE keyword in front of a VALUES row constructor.
    let using = if dialect.backend == BackendType::Db2 {
        format!("USING TABLE (VALUES {rows}) AS src ({column_list})")
    } else {
        format!("USING (VALUES {rows}) AS src ({column_list})")
    };

    let on = key_columns
        .iter()
        .map(|key| format!("target.{key} = src.{key}"))
        .collect::<Vec<_>>()
        .join(" AND ");

    let mut sql = format!("MERGE INTO {table} AS target {using} ON ({on})");

    if !no_update && !update_columns.is_empty() {
        let sets = update_columns
            .iter()
            .map(|col| format!("target.{col} = src.{col}"))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {sets}"));
    }

    let insert_values = columns
        .iter()
        .map(|col| format!("src.{col}"))
        .collect::<Vec<_>>()
        .join(", ");
    sql.push_str(&format!(
        " WHEN NOT MATCHED THEN INSERT ({column_list}) VALUES ({insert_values})"
    ));

    match dialect.backend {
        BackendType::Db2 => sql.push_str(" ELSE IGNORE"),
        // SQL Server requires MERGE statements to be terminated.
        BackendType::SqlServer => sql.push(';'),
        _ => {}
    }

    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn descriptor_lookup_is_static() {
        let dialect = lookup(BackendType::Postgres);
        assert_eq!(dialect.placeholder(3), "$3");
        assert!(dialect.supports_returning);
        assert_eq!(lookup(BackendType::SqlServer).quote_ident("t"), "[t]");
    }

    #[test]
    fn on_conflict_tail() {
        let tail = upsert_tail(
            lookup(BackendType::Postgres),
            &cols(&["id"]),
            &cols(&["name"]),
            false,
        )
        .unwrap();
        assert_eq!(tail, "ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name");

        let tail = upsert_tail(lookup(BackendType::Sqlite), &cols(&["id"]), &cols(&["name"]), true)
            .unwrap();
        assert_eq!(tail, "ON CONFLICT (id) DO NOTHING");
    }

    #[test]
    fn on_duplicate_key_tail() {
        let tail = upsert_tail(
            lookup(BackendType::Mysql),
            &cols(&["id"]),
            &cols(&["name", "age"]),
            false,
        )
        .unwrap();
        assert_eq!(
            tail,
            "ON DUPLICATE KEY UPDATE name = VALUES(name), age = VALUES(age)"
        );

        let tail =
            upsert_tail(lookup(BackendType::Mysql), &cols(&["id"]), &cols(&["name"]), true).unwrap();
        assert_eq!(tail, "ON DUPLICATE KEY UPDATE id = id");
    }

    #[test]
    fn merge_into_statement_shapes() {
        let sql = merge_into_sql(
            lookup(BackendType::Oracle),
            "t",
            &cols(&["id", "n"]),
            &cols(&["id"]),
            &cols(&["n"]),
            false,
            &["(:1, :2)".to_string()],
        );
        assert_eq!(
            sql,
            "MERGE INTO t AS target USING (VALUES (:1, :2)) AS src (id, n) ON (target.id = src.id) \
             WHEN MATCHED THEN UPDATE SET target.n = src.n \
             WHEN NOT MATCHED THEN INSERT (id, n) VALUES (src.id, src.n)"
        );

        let sql = merge_into_sql(
            lookup(BackendType::Db2),
            "t",
            &cols(&["id", "n"]),
            &cols(&["id"]),
            &cols(&["n"]),
            true,
            &["(?, ?)".to_string()],
        );
        assert!(sql.contains("USING TABLE (VALUES (?, ?))"));
        assert!(!sql.contains("WHEN MATCHED"));
        assert!(sql.ends_with("ELSE IGNORE"));

        let sql = merge_into_sql(
            lookup(BackendType::SqlServer),
            "t",
            &cols(&["id"]),
            &cols(&["id"]),
            &[],
            false,
            &["(?)".to_string()],
        );
        assert!(sql.ends_with(';'));
    }
}
