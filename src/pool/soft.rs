//! Reset-on-return pool backend: a soft cache of connections with no upper
//! bound on concurrent checkouts. Returned connections have already been
//! rolled back and switched to autocommit by the client wrapper; this
//! backend only validates and caches them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::driver::DriverConnection;
use crate::error::JrmError;

use super::eager::ConnManager;

pub(crate) struct SoftShared {
    idle: Mutex<VecDeque<Box<dyn DriverConnection>>>,
    max_cached: usize,
}

impl SoftShared {
    pub(crate) fn new(max_cached: usize) -> Self {
        Self {
            idle: Mutex::new(VecDeque::new()),
            max_cached,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Box<dyn DriverConnection>>> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Cache a reset connection, or drop it when the cache is full.
    pub(crate) fn put(&self, conn: Box<dyn DriverConnection>) {
        let mut idle = self.lock();
        if idle.len() < self.max_cached {
            idle.push_back(conn);
        }
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}

pub(crate) struct SoftPool {
    pub(crate) manager: ConnManager,
    pub(crate) shared: Arc<SoftShared>,
}

impl SoftPool {
    pub(crate) fn new(manager: ConnManager, max_cached: usize) -> Self {
        Self {
            manager,
            shared: Arc::new(SoftShared::new(max_cached)),
        }
    }

    /// Check out a cached connection that still answers its liveness probe,
    /// or open a fresh one.
    pub(crate) fn get(&self) -> Result<Box<dyn DriverConnection>, JrmError> {
        loop {
            let candidate = self.shared.lock().pop_front();
            match candidate {
                Some(mut conn) => {
                    if conn.ping().is_ok() {
                        return Ok(conn);
                    }
                    tracing::warn!("discarding dead pooled connection");
                }
                None => return self.manager.open(),
            }
        }
    }
}
