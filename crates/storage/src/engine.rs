//! Storage engine collaborator
//!
//! The coordinator never talks to a database directly. It opens an
//! [`EngineTransaction`] through a [`StorageEngine`], applies settings, runs
//! statements on behalf of the unit of work, and finishes with commit or
//! rollback. Adapters for SQL databases implement these traits and classify
//! native failures into [`courier_core::ErrorKind`].

use courier_core::{EngineResult, IsolationLevel};
use serde_json::Value;
use std::time::Duration;

/// A single statement executed inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Read one key
    Get(String),
    /// Write one key
    Put(String, Value),
    /// Remove one key
    Delete(String),
    /// Read every key starting with the prefix, in key order
    Scan(String),
    /// Hold the connection busy (like `pg_sleep`); subject to the statement timeout
    Sleep(Duration),
}

impl Statement {
    /// Whether executing this statement modifies data
    pub fn is_write(&self) -> bool {
        matches!(self, Statement::Put(..) | Statement::Delete(_))
    }
}

/// Result of executing a statement
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Single-key read result
    Value(Option<Value>),
    /// Prefix scan result, ordered by key
    Rows(Vec<(String, Value)>),
    /// Number of keys affected by a write
    Affected(u64),
    /// Statement produced nothing
    Empty,
}

impl Output {
    /// Extract a single-key read result
    pub fn into_value(self) -> Option<Value> {
        match self {
            Output::Value(v) => v,
            _ => None,
        }
    }

    /// Extract scan rows
    pub fn into_rows(self) -> Vec<(String, Value)> {
        match self {
            Output::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    /// Number of affected keys (zero for reads)
    pub fn affected(&self) -> u64 {
        match self {
            Output::Affected(n) => *n,
            _ => 0,
        }
    }
}

/// An engine capable of opening transactions
pub trait StorageEngine: Send + Sync {
    /// Transaction type produced by this engine
    type Transaction: EngineTransaction;

    /// Open a new transaction with engine-default settings
    fn begin(&self) -> EngineResult<Self::Transaction>;
}

/// An open transaction
///
/// Dropping a transaction without calling [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) must discard its writes.
pub trait EngineTransaction: Send {
    /// Set the isolation level; must precede the first statement
    fn set_isolation_level(&mut self, level: IsolationLevel) -> EngineResult<()>;

    /// Mark the transaction read-only
    fn set_read_only(&mut self, read_only: bool) -> EngineResult<()>;

    /// Set the per-statement timeout
    fn set_statement_timeout(&mut self, timeout: Duration) -> EngineResult<()>;

    /// Execute one statement
    fn execute(&mut self, statement: Statement) -> EngineResult<Output>;

    /// Create a named savepoint
    fn create_savepoint(&mut self, name: &str) -> EngineResult<()>;

    /// Release a savepoint and every savepoint created after it
    fn release_savepoint(&mut self, name: &str) -> EngineResult<()>;

    /// Undo writes made after the savepoint; the savepoint stays live
    fn rollback_to_savepoint(&mut self, name: &str) -> EngineResult<()>;

    /// Commit all writes atomically
    fn commit(self) -> EngineResult<()>;

    /// Discard all writes
    fn rollback(self) -> EngineResult<()>;
}
