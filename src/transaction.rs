//! Transaction scopes.
//!
//! A [`Transaction`] moves through `Idle -> Active -> {Committed |
//! RolledBack}`. Beginning switches the borrowed connection to
//! autocommit-off and applies the requested isolation level; dropping an
//! Active scope rolls back. Autocommit is restored before the connection
//! returns to the pool on every path.

use crate::db::Db;
use crate::error::JrmError;
use crate::pool::Client;
use crate::types::IsolationLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Active,
    Committed,
    RolledBack,
}

pub struct Transaction {
    client: Option<Client>,
    state: TxState,
}

impl Transaction {
    /// Begin a transaction on the client: autocommit off, then the
    /// isolation level if one was requested.
    ///
    /// # Errors
    ///
    /// Driver errors switching autocommit or applying the level.
    pub(crate) fn begin(
        mut client: Client,
        isolation: Option<IsolationLevel>,
    ) -> Result<Self, JrmError> {
        client.connection().set_autocommit(false)?;
        if let Some(level) = isolation {
            client.connection().set_isolation(level)?;
        }
        tracing::debug!("transaction started");
        Ok(Self {
            client: Some(client),
            state: TxState::Active,
        })
    }

    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    /// The CRUD facade bound to this transaction's connection.
    pub fn db(&mut self) -> Db<'_> {
        self.client
            .as_mut()
            .expect("transaction client already released")
            .db()
    }

    pub fn client_mut(&mut self) -> &mut Client {
        self.client
            .as_mut()
            .expect("transaction client already released")
    }

    /// Commit and end the scope. The connection's autocommit is restored
    /// before it returns to the pool.
    ///
    /// # Errors
    ///
    /// Driver errors on COMMIT; the scope still ends and the connection is
    /// released.
    pub fn commit(mut self) -> Result<(), JrmError> {
        let mut client = self.client.take().expect("transaction already finished");
        self.state = TxState::Committed;
        let result = client.connection().commit();
        if let Err(e) = client.connection().set_autocommit(true) {
            tracing::warn!("autocommit restore after commit failed: {e}");
        }
        tracing::debug!("transaction committed");
        result
    }

    /// Roll back and end the scope.
    ///
    /// # Errors
    ///
    /// Driver errors on ROLLBACK; the scope still ends and the connection
    /// is released.
    pub fn rollback(mut self) -> Result<(), JrmError> {
        let mut client = self.client.take().expect("transaction already finished");
        self.state = TxState::RolledBack;
        let result = client.connection().rollback();
        if let Err(e) = client.connection().set_autocommit(true) {
            tracing::warn!("autocommit restore after rollback failed: {e}");
        }
        tracing::debug!("transaction rolled back");
        result
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // Scope exited without an explicit commit: roll back. The client's
        // own drop restores autocommit and returns the connection.
        if let Some(mut client) = self.client.take() {
            self.state = TxState::RolledBack;
            if let Err(e) = client.connection().rollback() {
                tracing::warn!("implicit rollback failed: {e}");
            }
            tracing::debug!("transaction rolled back on scope exit");
        }
    }
}
