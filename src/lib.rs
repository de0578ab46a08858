//! Courier - transactional execution and rate admission core
//!
//! Courier is the part of the email assistant backend that decides whether an
//! operation may run and, if so, runs it atomically:
//! - Rate admission: sliding-window limits per caller, with presets for API,
//!   sign-in, password reset and webhook traffic
//! - Coordinated transactions: conflict retry with exponential backoff,
//!   savepoints, batches and stuck-transaction detection
//!
//! # Quick Start
//!
//! ```ignore
//! use courier::{CallerContext, Courier, CourierConfig, MemoryEngine, Preset};
//! use std::sync::Arc;
//!
//! let courier = Courier::new(Arc::new(MemoryEngine::new()), &CourierConfig::default())?;
//!
//! let caller = CallerContext::from_addr("203.0.113.9");
//! let admission = courier.admission().check_preset(Preset::Api, &caller);
//! if !admission.success {
//!     return Err(admission.user_message());
//! }
//!
//! courier.coordinator().run(courier.coordinator().options(), |txn| {
//!     txn.put("draft:1", serde_json::json!({"subject": "hello"}))
//! })?;
//! ```
//!
//! # Architecture
//!
//! [`Courier`] is a context object: it owns one coordinator and one admission
//! service and is passed to request handlers. There are no process-wide
//! singletons apart from the savepoint name counter.

#![warn(missing_docs)]
#![warn(clippy::all)]

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub use courier_admission::{
    Admission, AdmissionPolicy, CallerContext, ParsePresetError, Preset, PresetTable,
    RateAdmissionService, RateLimit, WindowStore, WindowSweeper,
};
pub use courier_core::{
    Clock, EngineError, EngineResult, ErrorKind, IsolationLevel, ManualClock, SystemClock,
    Timestamp, TxnId,
};
pub use courier_engine::{
    step, ActiveTransaction, AdmissionSettings, BatchStep, ConfigError, CourierConfig,
    RetryConfig, TransactionCoordinator, TransactionDefaults, TransactionMetrics,
    TransactionOptions, TransactionResult, TxnError, TxnHandle, TxnResult, CONFIG_FILE_NAME,
};
pub use courier_storage::{
    EngineTransaction, MemoryEngine, MemoryTransaction, Output, Statement, StorageEngine,
};

/// Failure to assemble a [`Courier`] context
#[derive(Debug, Error)]
pub enum CourierError {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A preset override names an unknown preset
    #[error(transparent)]
    Preset(#[from] ParsePresetError),
}

/// Build the effective preset table from configuration
pub fn preset_table(settings: &AdmissionSettings) -> Result<PresetTable, ParsePresetError> {
    let mut table = PresetTable::new();
    for (name, limit) in &settings.presets {
        table.set_override(
            name,
            RateLimit::new(limit.max_events, Duration::from_secs(limit.window_secs)),
        )?;
    }
    Ok(table)
}

/// Transaction coordinator and admission service for one process
pub struct Courier<E: StorageEngine> {
    coordinator: Arc<TransactionCoordinator<E>>,
    admission: Arc<RateAdmissionService>,
    sweeper: WindowSweeper,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<E: StorageEngine> Courier<E> {
    /// Assemble a context on the system clock and start the window sweeper
    pub fn new(engine: Arc<E>, config: &CourierConfig) -> Result<Self, CourierError> {
        Self::with_clock(engine, config, Arc::new(SystemClock))
    }

    /// Load `courier.toml` from `config_dir` (creating it if missing) and assemble a context
    pub fn open(engine: Arc<E>, config_dir: &Path) -> Result<Self, CourierError> {
        let config = CourierConfig::load_or_create(config_dir)?;
        Self::new(engine, &config)
    }

    /// Assemble a context on an explicit clock and start the window sweeper
    pub fn with_clock(
        engine: Arc<E>,
        config: &CourierConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CourierError> {
        config.validate()?;
        let presets = preset_table(&config.admission)?;

        let coordinator = TransactionCoordinator::with_clock(engine, Arc::clone(&clock))
            .with_defaults(config.transactions.to_options())
            .with_long_running_threshold(config.transactions.long_running_threshold());

        let store = Arc::new(WindowStore::with_clock(clock));
        let admission = RateAdmissionService::new(Arc::clone(&store)).with_presets(presets);
        let sweeper = WindowSweeper::new(store, config.admission.sweep_interval());
        let handle = sweeper.start();

        info!(target: "courier::config", sweep_interval_secs = config.admission.sweep_interval_secs, max_retries = config.transactions.max_retries, "Courier context ready");

        Ok(Self {
            coordinator: Arc::new(coordinator),
            admission: Arc::new(admission),
            sweeper,
            sweeper_handle: Mutex::new(Some(handle)),
        })
    }

    /// The transaction coordinator
    pub fn coordinator(&self) -> &Arc<TransactionCoordinator<E>> {
        &self.coordinator
    }

    /// The rate admission service
    pub fn admission(&self) -> &Arc<RateAdmissionService> {
        &self.admission
    }

    /// Stop the sweeper and wait up to `timeout` for in-flight transactions
    ///
    /// Returns `false` if transactions were still running when the timeout
    /// expired. Safe to call more than once.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.stop_sweeper();
        let idle = self.coordinator.wait_for_idle(timeout);
        if !idle {
            warn!(target: "courier::txn", active = self.coordinator.active_count(), "Shutdown timed out with transactions in flight");
            self.coordinator.log_long_running(Duration::ZERO);
        }
        idle
    }

    fn stop_sweeper(&self) {
        self.sweeper.shutdown();
        if let Some(handle) = self.sweeper_handle.lock().take() {
            if handle.join().is_err() {
                warn!(target: "courier::admission", "Window sweeper thread panicked");
            }
        }
    }
}

impl<E: StorageEngine> Drop for Courier<E> {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
