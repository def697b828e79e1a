//! Driver abstraction: the cursor-shaped API every backend plugs into.
//!
//! Built-in drivers cover SQLite, PostgreSQL and MySQL. Oracle, Db2,
//! SQL Server, Spark and anything tagged `generic` connect through a
//! [`DriverFactory`] registered on the pool builder; the dialect layer
//! still generates their SQL, the factory only supplies live connections.

use std::io::Read;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::JrmError;
use crate::record::Record;
use crate::types::{BackendType, DbValue, IsolationLevel};

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// A forward-only reader over one statement's result set.
///
/// Rows come back as [`Record`]s keyed by the cursor's column names, so no
/// caller ever branches on driver row types.
pub trait SqlCursor {
    /// Column names of the result set, available before the first row.
    fn columns(&self) -> Vec<String>;

    /// Fetch the next row, or `None` when the set is exhausted.
    ///
    /// # Errors
    ///
    /// Driver errors decoding or fetching the row.
    fn next_row(&mut self) -> Result<Option<Record>, JrmError>;
}

/// A live connection to one backend.
///
/// Values passed in `params` are already prepared: keyword literals have
/// been inlined into the SQL and the remaining values bind positionally in
/// the dialect's placeholder style.
pub trait DriverConnection: Send {
    fn driver_name(&self) -> &'static str;

    /// Run a statement that returns no rows; returns the affected count.
    ///
    /// # Errors
    ///
    /// Driver-reported SQL or connection errors.
    fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, JrmError>;

    /// Run a query and return a cursor over its rows. Drivers stream from
    /// the server where their protocol allows; SQLite materializes, which
    /// is the client-side simulation for an in-process engine.
    ///
    /// # Errors
    ///
    /// Driver-reported SQL or connection errors.
    fn query<'a>(
        &'a mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Box<dyn SqlCursor + 'a>, JrmError>;

    /// Toggle autocommit. Turning it off opens a transaction; turning it on
    /// discards any transaction still open.
    ///
    /// # Errors
    ///
    /// Driver errors issuing the transaction-control statements.
    fn set_autocommit(&mut self, on: bool) -> Result<(), JrmError>;

    fn autocommit(&self) -> bool;

    /// # Errors
    ///
    /// Driver errors on COMMIT.
    fn commit(&mut self) -> Result<(), JrmError>;

    /// # Errors
    ///
    /// Driver errors on ROLLBACK.
    fn rollback(&mut self) -> Result<(), JrmError>;

    /// Apply an isolation level to the session or the open transaction.
    /// Backends without support log a warning and proceed at their default.
    ///
    /// # Errors
    ///
    /// Driver errors issuing the SET TRANSACTION statement.
    fn set_isolation(&mut self, level: IsolationLevel) -> Result<(), JrmError> {
        tracing::warn!(
            "isolation level {} not supported by {}; proceeding at driver default",
            level.as_sql(),
            self.driver_name()
        );
        Ok(())
    }

    /// Liveness probe used by the pool before handing the connection out.
    ///
    /// # Errors
    ///
    /// `ConnectionError` when the connection is no longer usable.
    fn ping(&mut self) -> Result<(), JrmError>;

    /// Feed a data stream into a COPY-style bulk command. Only PostgreSQL
    /// implements this; everything else reports `Unsupported` and the
    /// bulk-load dispatcher picks a different path.
    ///
    /// # Errors
    ///
    /// `Unsupported`, or driver errors from the copy protocol.
    fn copy_in(&mut self, sql: &str, reader: &mut dyn Read) -> Result<u64, JrmError> {
        let _ = (sql, reader);
        Err(JrmError::Unsupported(format!(
            "{} does not implement COPY input",
            self.driver_name()
        )))
    }

    /// Engine-side file-to-table load (the Spark session path).
    ///
    /// # Errors
    ///
    /// `Unsupported` for drivers without an engine-side file loader.
    fn load_file(&mut self, table: &str, request: &crate::bulk::LoadRequest) -> Result<u64, JrmError> {
        let _ = (table, request);
        Err(JrmError::Unsupported(format!(
            "{} does not implement file loads",
            self.driver_name()
        )))
    }
}

/// Factory for connections to backends without a built-in driver.
pub trait DriverFactory: Send + Sync {
    /// Driver name recorded on clients, e.g. `"odbc"`.
    fn name(&self) -> &'static str;

    /// Open a live connection for the descriptor.
    ///
    /// # Errors
    ///
    /// `ConnectionError` on failure to connect within the timeout.
    fn connect(
        &self,
        cfg: &DatabaseConfig,
        connect_timeout: Duration,
    ) -> Result<Box<dyn DriverConnection>, JrmError>;
}

/// Construct a live connection for the descriptor, dispatching to the
/// built-in driver for the backend or to the registered factory.
///
/// # Errors
///
/// `ConfigError` when the backend has no built-in driver and no factory is
/// registered; otherwise whatever the driver reports.
pub(crate) fn connect(
    cfg: &DatabaseConfig,
    connect_timeout: Duration,
    custom: Option<&std::sync::Arc<dyn DriverFactory>>,
) -> Result<Box<dyn DriverConnection>, JrmError> {
    match cfg.backend {
        #[cfg(feature = "sqlite")]
        BackendType::Sqlite => Ok(Box::new(sqlite::SqliteConnection::connect(cfg)?)),
        #[cfg(feature = "postgres")]
        BackendType::Postgres => Ok(Box::new(postgres::PostgresConnection::connect(
            cfg,
            connect_timeout,
        )?)),
        #[cfg(feature = "mysql")]
        BackendType::Mysql => Ok(Box::new(mysql::MysqlConnection::connect(
            cfg,
            connect_timeout,
        )?)),
        backend => match custom {
            Some(factory) => factory.connect(cfg, connect_timeout),
            None => Err(JrmError::ConfigError(format!(
                "backend {backend} has no built-in driver; register a driver factory on the pool"
            ))),
        },
    }
}
