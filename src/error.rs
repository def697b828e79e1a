use thiserror::Error;

#[cfg(feature = "mysql")]
use mysql;
#[cfg(feature = "postgres")]
use postgres;
#[cfg(feature = "sqlite")]
use rusqlite;

/// Unified error type for every fallible operation in the crate.
///
/// Driver errors are wrapped transparently so callers can still reach the
/// underlying error when they need driver-specific detail; everything else
/// is carried as a descriptive message.
#[derive(Debug, Error)]
pub enum JrmError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] postgres::Error),

    #[cfg(feature = "mysql")]
    #[error(transparent)]
    MysqlError(#[from] mysql::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Malformed binding: {0}")]
    MalformedBinding(String),

    #[error("Malformed condition: {0}")]
    MalformedCondition(String),

    #[error("SQL error: {0}")]
    SqlError(String),

    #[error("Delta table required: {0}")]
    DeltaRequired(String),

    #[error("Stream aborted after {rows} rows: {message}")]
    StreamAborted { rows: u64, message: String },

    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

impl From<r2d2::Error> for JrmError {
    fn from(err: r2d2::Error) -> Self {
        // r2d2 surfaces checkout timeouts through its single opaque error type.
        JrmError::PoolExhausted(err.to_string())
    }
}
