//! Handle passed to units of work
//!
//! A [`TxnHandle`] borrows the open engine transaction for one attempt. The
//! coordinator owns commit and rollback; the handle only runs statements and
//! manages savepoints.

use crate::error::TxnResult;
use crate::savepoint;
use courier_core::TxnId;
use courier_storage::{EngineTransaction, Output, Statement};
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

/// Access to the open transaction during one attempt
pub struct TxnHandle<'a, T: EngineTransaction> {
    txn: &'a mut T,
    id: TxnId,
    attempt: u32,
}

impl<'a, T: EngineTransaction> TxnHandle<'a, T> {
    pub(crate) fn new(txn: &'a mut T, id: TxnId, attempt: u32) -> Self {
        Self { txn, id, attempt }
    }

    /// Identifier of the logical transaction (stable across retries)
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Zero-based attempt number; non-zero means this is a retry
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn transaction(&mut self) -> &mut T {
        &mut *self.txn
    }

    /// Execute a raw statement
    pub fn execute(&mut self, statement: Statement) -> TxnResult<Output> {
        trace!(target: "courier::txn", txn = %self.id, write = statement.is_write(), "Statement");
        Ok(self.txn.execute(statement)?)
    }

    /// Read one key
    pub fn get(&mut self, key: &str) -> TxnResult<Option<Value>> {
        Ok(self.execute(Statement::Get(key.to_string()))?.into_value())
    }

    /// Write one key
    pub fn put(&mut self, key: impl Into<String>, value: Value) -> TxnResult<()> {
        self.execute(Statement::Put(key.into(), value))?;
        Ok(())
    }

    /// Delete one key, returning whether it existed
    pub fn delete(&mut self, key: &str) -> TxnResult<bool> {
        Ok(self.execute(Statement::Delete(key.to_string()))?.affected() > 0)
    }

    /// Read every key under `prefix`, in key order
    pub fn scan(&mut self, prefix: &str) -> TxnResult<Vec<(String, Value)>> {
        Ok(self.execute(Statement::Scan(prefix.to_string()))?.into_rows())
    }

    /// Keep the connection busy for `duration`, subject to the statement timeout
    pub fn sleep(&mut self, duration: Duration) -> TxnResult<()> {
        self.execute(Statement::Sleep(duration))?;
        Ok(())
    }

    /// Create a savepoint; see [`savepoint::create_savepoint`]
    pub fn savepoint(&mut self, name: Option<&str>) -> TxnResult<String> {
        savepoint::create_savepoint(self, name)
    }

    /// Release a savepoint; see [`savepoint::release_savepoint`]
    pub fn release_savepoint(&mut self, name: &str) -> TxnResult<()> {
        savepoint::release_savepoint(self, name)
    }

    /// Roll back to a savepoint; see [`savepoint::rollback_to_savepoint`]
    pub fn rollback_to_savepoint(&mut self, name: &str) -> TxnResult<()> {
        savepoint::rollback_to_savepoint(self, name)
    }

    /// Run `f` as a nested unit of work
    ///
    /// On success the nested savepoint is released. On failure only the
    /// nested writes are undone and `f`'s error is returned; the enclosing
    /// transaction stays usable. If the rollback itself fails, that error is
    /// returned instead.
    pub fn nested<R, F>(&mut self, f: F) -> TxnResult<R>
    where
        F: FnOnce(&mut Self) -> TxnResult<R>,
    {
        let name = savepoint::create_savepoint(self, None)?;
        match f(self) {
            Ok(value) => {
                savepoint::release_savepoint(self, &name)?;
                Ok(value)
            }
            Err(e) => {
                savepoint::rollback_to_savepoint(self, &name)?;
                savepoint::release_savepoint(self, &name)?;
                Err(e)
            }
        }
    }
}

impl<T: EngineTransaction> std::fmt::Debug for TxnHandle<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnHandle")
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .finish()
    }
}
