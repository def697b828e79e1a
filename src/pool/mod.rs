//! Connection pooling behind one facade.
//!
//! Two backends implement the pool: an eager r2d2-based pool (pre-allocated
//! connections, blocking checkout with timeout, idle recycling, liveness
//! probe) and a soft reset-on-return pool. The autocommit discipline lives
//! here, not in the backends: a checked-out [`Client`] always starts with
//! autocommit on, and release rolls back and restores autocommit on every
//! exit path.

mod eager;
mod soft;

use std::sync::Arc;
use std::time::Duration;

use eager::ConnManager;
use soft::{SoftPool, SoftShared};

use crate::config::{DatabaseConfig, JrmConfig};
use crate::db::{BatchOp, Db};
use crate::dialect::{self, Dialect};
use crate::driver::{DriverConnection, DriverFactory};
use crate::error::JrmError;
use crate::result::DbResult;
use crate::transaction::Transaction;
use crate::types::{BackendType, IsolationLevel};

/// Which pool backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolBackend {
    /// Pre-allocating pool with blocking checkout (r2d2).
    #[default]
    Eager,
    /// Soft pool that resets connections on return.
    Soft,
}

/// Builder for a [`Pool`].
pub struct PoolBuilder {
    cfg: DatabaseConfig,
    backend: PoolBackend,
    min_size: u32,
    max_size: u32,
    max_cached: u32,
    connect_timeout: Duration,
    checkout_timeout: Duration,
    idle_timeout: Duration,
    fetch_limit: u64,
    factory: Option<Arc<dyn DriverFactory>>,
}

impl PoolBuilder {
    #[must_use]
    pub fn new(cfg: DatabaseConfig) -> Self {
        let defaults = JrmConfig::default();
        Self {
            cfg,
            backend: PoolBackend::default(),
            min_size: defaults.min_pool_size,
            max_size: defaults.max_pool_size,
            max_cached: defaults.max_cached_conn,
            connect_timeout: defaults.connect_timeout,
            checkout_timeout: defaults.pool_timeout,
            idle_timeout: Duration::from_secs(600),
            fetch_limit: defaults.data_fetch_limit,
            factory: None,
        }
    }

    #[must_use]
    pub fn backend(mut self, backend: PoolBackend) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn min_size(mut self, min_size: u32) -> Self {
        self.min_size = min_size;
        self
    }

    #[must_use]
    pub fn max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn max_cached(mut self, max_cached: u32) -> Self {
        self.max_cached = max_cached;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// How long `client()` may block waiting for a free connection.
    #[must_use]
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// Idle period after which the eager backend recycles a connection.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn fetch_limit(mut self, limit: u64) -> Self {
        self.fetch_limit = limit;
        self
    }

    /// Register a driver factory for backends without a built-in driver
    /// (Oracle, Db2, SQL Server, Spark, generic).
    #[must_use]
    pub fn driver_factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build the pool. The eager backend connects its minimum set now.
    ///
    /// # Errors
    ///
    /// `ConfigError` on an invalid descriptor; connection errors from the
    /// eager pre-allocation.
    pub fn build(self) -> Result<Pool, JrmError> {
        self.cfg.validate()?;
        let dialect = dialect::lookup(self.cfg.backend);
        let database_name = self.cfg.database.clone().unwrap_or_default();
        let driver_label = self.factory.as_ref().map(|f| f.name().to_string());

        let manager = ConnManager {
            cfg: self.cfg,
            connect_timeout: self.connect_timeout,
            factory: self.factory,
        };

        let inner = match self.backend {
            PoolBackend::Eager => PoolInner::Eager(eager::build(
                manager,
                self.min_size,
                self.max_size,
                self.checkout_timeout,
                self.idle_timeout,
            )?),
            PoolBackend::Soft => {
                PoolInner::Soft(Arc::new(SoftPool::new(manager, self.max_cached as usize)))
            }
        };

        Ok(Pool {
            inner,
            dialect,
            database_name,
            driver_label,
            fetch_limit: self.fetch_limit,
        })
    }
}

enum PoolInner {
    Eager(r2d2::Pool<ConnManager>),
    Soft(Arc<SoftPool>),
}

/// The pool facade. Safe to share across threads; checkout is serialized
/// inside each backend.
pub struct Pool {
    inner: PoolInner,
    dialect: &'static Dialect,
    database_name: String,
    driver_label: Option<String>,
    fetch_limit: u64,
}

impl Pool {
    /// Start building a pool for one connection descriptor.
    #[must_use]
    pub fn builder(cfg: DatabaseConfig) -> PoolBuilder {
        PoolBuilder::new(cfg)
    }

    /// Build a pool from a named entry of a [`JrmConfig`], inheriting its
    /// tuning values.
    ///
    /// # Errors
    ///
    /// `ConfigError` for unknown names; connection errors from eager
    /// pre-allocation.
    pub fn from_config(
        config: &JrmConfig,
        name: Option<&str>,
        backend: PoolBackend,
    ) -> Result<Pool, JrmError> {
        let cfg = config.require(name)?.clone();
        PoolBuilder::new(cfg)
            .backend(backend)
            .min_size(config.min_pool_size)
            .max_size(config.max_pool_size)
            .max_cached(config.max_cached_conn)
            .connect_timeout(config.connect_timeout)
            .checkout_timeout(config.pool_timeout)
            .fetch_limit(config.data_fetch_limit)
            .build()
    }

    #[must_use]
    pub fn backend_type(&self) -> BackendType {
        self.dialect.backend
    }

    /// Borrow a client. The connection is guaranteed to have autocommit on.
    ///
    /// # Errors
    ///
    /// `PoolExhausted` when checkout times out; connection errors when a
    /// fresh connection must be opened and fails.
    pub fn client(&self) -> Result<Client, JrmError> {
        let mut conn = match &self.inner {
            PoolInner::Eager(pool) => ClientConn::Eager(pool.get()?),
            PoolInner::Soft(pool) => ClientConn::Soft {
                conn: Some(pool.get()?),
                shared: Arc::clone(&pool.shared),
            },
        };
        // Normalize state on checkout in one place.
        conn.as_mut().set_autocommit(true)?;

        let driver_name = self
            .driver_label
            .clone()
            .unwrap_or_else(|| conn.as_mut().driver_name().to_string());

        Ok(Client {
            conn: Some(conn),
            dialect: self.dialect,
            database_name: self.database_name.clone(),
            driver_name,
            fetch_limit: self.fetch_limit,
        })
    }

    /// Borrow a client already switched into a transaction scope.
    ///
    /// # Errors
    ///
    /// Checkout errors, or driver errors switching autocommit off and
    /// applying the isolation level.
    pub fn transaction(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Transaction, JrmError> {
        Transaction::begin(self.client()?, isolation)
    }

    /// Run a sequence of operations atomically inside one transaction:
    /// commit when every envelope reports success, roll back (and return
    /// the first failure as an error) otherwise.
    ///
    /// # Errors
    ///
    /// Checkout/transaction errors, or `SqlError` carrying the first failed
    /// operation's message.
    pub fn execute_batch(
        &self,
        ops: &[BatchOp],
        isolation: Option<IsolationLevel>,
    ) -> Result<Vec<DbResult>, JrmError> {
        let mut tx = self.transaction(isolation)?;
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let result = tx.db().apply(op);
            let failed = !result.is_ok();
            results.push(result);
            if failed {
                let message = results.last().map(|r| r.message.clone()).unwrap_or_default();
                tx.rollback()?;
                return Err(JrmError::SqlError(message));
            }
        }
        tx.commit()?;
        Ok(results)
    }

    /// Drop the pool's cached connections. Outstanding clients keep their
    /// connections until released.
    pub fn dispose(&self) {
        if let PoolInner::Soft(pool) = &self.inner {
            pool.shared.clear();
        }
    }
}

enum ClientConn {
    Eager(r2d2::PooledConnection<ConnManager>),
    Soft {
        conn: Option<Box<dyn DriverConnection>>,
        shared: Arc<SoftShared>,
    },
}

impl ClientConn {
    fn as_mut(&mut self) -> &mut dyn DriverConnection {
        match self {
            ClientConn::Eager(guard) => &mut ***guard,
            ClientConn::Soft { conn, .. } => conn
                .as_mut()
                .expect("soft pool connection already returned")
                .as_mut(),
        }
    }
}

/// A borrowed connection plus the dialect needed to operate on it.
///
/// Not safe to share across threads; restrict each client to one thread for
/// its lifetime. Dropping the client rolls back any open transaction,
/// restores autocommit and returns the connection to its pool.
pub struct Client {
    conn: Option<ClientConn>,
    dialect: &'static Dialect,
    database_name: String,
    driver_name: String,
    fetch_limit: u64,
}

impl Client {
    pub fn connection(&mut self) -> &mut dyn DriverConnection {
        self.conn
            .as_mut()
            .expect("client connection already released")
            .as_mut()
    }

    #[must_use]
    pub fn backend(&self) -> BackendType {
        self.dialect.backend
    }

    #[must_use]
    pub fn dialect(&self) -> &'static Dialect {
        self.dialect
    }

    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Informational driver label; dispatch reads the backend instead.
    #[must_use]
    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    #[must_use]
    pub fn fetch_limit(&self) -> u64 {
        self.fetch_limit
    }

    /// Wrap this client in the CRUD facade.
    pub fn db(&mut self) -> Db<'_> {
        Db::new(self)
    }

    /// Build a client around an unpooled connection. Useful for embedded
    /// setups and tests; release discipline still applies on drop.
    #[must_use]
    pub fn direct(
        conn: Box<dyn DriverConnection>,
        backend: BackendType,
        database_name: impl Into<String>,
        fetch_limit: u64,
    ) -> Self {
        let driver_name = conn.driver_name().to_string();
        Client {
            conn: Some(ClientConn::Soft {
                conn: Some(conn),
                shared: Arc::new(SoftShared::new(0)),
            }),
            dialect: dialect::lookup(backend),
            database_name: database_name.into(),
            driver_name,
            fetch_limit,
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let Some(mut cc) = self.conn.take() else {
            return;
        };
        // Release discipline: no open transaction, autocommit back on.
        let conn = cc.as_mut();
        let mut healthy = true;
        if let Err(e) = conn.rollback() {
            tracing::warn!("rollback on release failed: {e}");
            healthy = false;
        }
        if let Err(e) = conn.set_autocommit(true) {
            tracing::warn!("autocommit restore on release failed: {e}");
            healthy = false;
        }
        match cc {
            ClientConn::Eager(guard) => drop(guard),
            ClientConn::Soft { conn, shared } => {
                if healthy && let Some(conn) = conn {
                    shared.put(conn);
                }
            }
        }
    }
}
