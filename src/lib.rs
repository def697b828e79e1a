/*!
 * jrm - JSON relational mapping over SQL backends
 *
 * This crate provides one data-structure-driven surface for CRUD, upsert,
 * bulk-load, streaming export and transaction-scoped workflows against
 * PostgreSQL, MySQL/MariaDB, SQLite, Oracle, IBM Db2, SQL Server and Spark
 * SQL, plus a pluggable driver seam for any other engine with a
 * cursor-shaped API. Inputs and outputs are ordinary records (ordered
 * column-to-value mappings); queries are raw SQL with bound parameters in
 * any common placeholder style, or structured descriptions (table, column
 * list, condition tree, options).
 *
 * # Features
 *
 * - Dialect-aware SQL generation: placeholder styles, LIMIT/TOP/FETCH
 *   FIRST, `ON CONFLICT` / `ON DUPLICATE KEY` / `MERGE INTO` upserts
 * - Connection pooling with two backends (eager and reset-on-return)
 *   behind one facade with a uniform autocommit discipline
 * - Transaction scopes with isolation levels and rollback-on-drop
 * - Row and batch streaming, periodic-commit stream writers, CSV export
 * - Native bulk-load paths: PostgreSQL COPY, Db2 ADMIN_CMD LOAD, Spark
 *   file loads, batched INSERT fallback
 *
 * # Example
 *
 * ```rust
 * use jrm::prelude::*;
 *
 * fn demo() -> Result<(), JrmError> {
 *     let cfg = DatabaseConfig {
 *         backend: BackendType::Sqlite,
 *         database: Some(":memory:".into()),
 *         ..DatabaseConfig::default()
 *     };
 *     let pool = Pool::builder(cfg).build()?;
 *
 *     let mut client = pool.client()?;
 *     let mut db = client.db();
 *     db.execute("CREATE TABLE users (id INTEGER, name TEXT)", ())
 *         .into_result()?;
 *     db.insert("users", &Record::new().with("id", 1).with("name", "alice"), None)
 *         .into_result()?;
 *
 *     let found = db.select(
 *         "users",
 *         &["id", "name"],
 *         Some(&Condition::new().eq("id", 1)),
 *         None,
 *     );
 *     assert_eq!(found.count, 1);
 *     Ok(())
 * }
 * # demo().unwrap();
 * ```
 */

#![forbid(unsafe_code)]

pub mod bulk;
pub mod condition;
pub mod config;
pub mod csv_io;
pub mod db;
pub mod dialect;
pub mod driver;
pub mod dsn;
pub mod error;
pub mod partition;
pub mod placeholder;
pub mod pool;
pub mod record;
pub mod result;
pub mod script;
pub mod spark;
pub mod stream;
pub mod transaction;
pub mod types;
pub mod value_format;

// Re-export everything that should be part of the public API
pub mod prelude {
    //! Convenient imports for common functionality.

    pub use crate::bulk::{LoadMode, LoadRequest, LoadSource};
    pub use crate::condition::{Condition, ConditionNode};
    pub use crate::config::{DatabaseConfig, JrmConfig};
    pub use crate::csv_io::CsvOptions;
    pub use crate::db::{BatchOp, Db, SelectOptions};
    pub use crate::error::JrmError;
    pub use crate::placeholder::{Params, PlaceholderStyle};
    pub use crate::pool::{Client, Pool, PoolBackend, PoolBuilder};
    pub use crate::record::Record;
    pub use crate::result::DbResult;
    pub use crate::stream::{RowStatus, StreamBatch, StreamRow, StreamWriteOptions};
    pub use crate::transaction::{Transaction, TxState};
    pub use crate::types::{BackendType, DbValue, IsolationLevel};
}

pub use condition::Condition;
pub use config::{DatabaseConfig, JrmConfig};
pub use db::{Db, SelectOptions};
pub use error::JrmError;
pub use pool::{Client, Pool, PoolBackend};
pub use record::Record;
pub use result::DbResult;
pub use transaction::Transaction;
pub use types::{BackendType, DbValue, IsolationLevel};
