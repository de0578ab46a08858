//! Transaction execution for Courier
//!
//! This crate runs units of work inside storage engine transactions:
//! - TransactionCoordinator: open/run/commit with conflict retry and backoff,
//!   active-transaction registry, stuck-transaction detection, metrics
//! - Batch execution: ordered steps applied atomically
//! - Savepoints: partial rollback and nested units of work
//! - CourierConfig: `courier.toml` loading
//!
//! Only conflict-class engine failures (serialization failures and
//! deadlocks) are retried. The unit of work may run more than once, so any
//! effect it has outside the transaction must be safe to repeat.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod options;
pub mod savepoint;

pub use batch::{step, BatchStep};
pub use config::{
    AdmissionSettings, ConfigError, ConfigResult, CourierConfig, RateOverride,
    TransactionDefaults, CONFIG_FILE_NAME,
};
pub use coordinator::{
    ActiveTransaction, TransactionCoordinator, TransactionMetrics, TransactionResult,
    DEFAULT_LONG_RUNNING_THRESHOLD,
};
pub use error::{TxnError, TxnResult};
pub use handle::TxnHandle;
pub use options::{RetryConfig, TransactionOptions};
