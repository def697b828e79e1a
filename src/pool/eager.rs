//! Eager pool backend: r2d2 pre-allocates `min_size` connections, blocks on
//! checkout up to the timeout, recycles idle connections and probes liveness
//! before handing one out.

use std::sync::Arc;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::driver::{self, DriverConnection, DriverFactory};
use crate::error::JrmError;

/// Connection manager shared by both pool backends: it owns the descriptor
/// and the optional custom driver factory.
pub(crate) struct ConnManager {
    pub(crate) cfg: DatabaseConfig,
    pub(crate) connect_timeout: Duration,
    pub(crate) factory: Option<Arc<dyn DriverFactory>>,
}

impl ConnManager {
    pub(crate) fn open(&self) -> Result<Box<dyn DriverConnection>, JrmError> {
        driver::connect(&self.cfg, self.connect_timeout, self.factory.as_ref())
    }
}

impl r2d2::ManageConnection for ConnManager {
    type Connection = Box<dyn DriverConnection>;
    type Error = JrmError;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.open()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.ping()
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

pub(crate) fn build(
    manager: ConnManager,
    min_size: u32,
    max_size: u32,
    checkout_timeout: Duration,
    idle_timeout: Duration,
) -> Result<r2d2::Pool<ConnManager>, JrmError> {
    let pool = r2d2::Pool::builder()
        .min_idle(Some(min_size))
        .max_size(max_size.max(1))
        .connection_timeout(checkout_timeout)
        .idle_timeout(Some(idle_timeout))
        .test_on_check_out(true)
        .build(manager)?;
    Ok(pool)
}
