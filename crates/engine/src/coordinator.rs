//! Transaction coordinator
//!
//! Runs a unit of work inside an engine transaction, retrying the whole
//! open/run/commit sequence when the engine reports a conflict.
//!
//! The coordinator also keeps an active-transaction registry for
//! observability:
//! - A record exists for as long as its logical transaction is in flight,
//!   including the backoff sleep between attempts
//! - Records are removed by a guard, so panics inside a unit of work do not
//!   leak entries
//! - Long-running transactions can be listed or logged against a threshold

use crate::error::{TxnError, TxnResult};
use crate::handle::TxnHandle;
use crate::options::TransactionOptions;
use courier_core::{Clock, EngineResult, SystemClock, Timestamp, TxnId};
use courier_storage::{EngineTransaction, StorageEngine};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default age after which a transaction counts as long-running
pub const DEFAULT_LONG_RUNNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Registry entry for an in-flight transaction
#[derive(Debug, Clone)]
struct TransactionRecord {
    name: Option<String>,
    started_at: Timestamp,
    retry_count: u32,
}

/// Snapshot of an in-flight transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTransaction {
    /// Transaction identifier
    pub id: TxnId,
    /// Caller-supplied label
    pub name: Option<String>,
    /// When the coordinator accepted the call
    pub started_at: Timestamp,
    /// Time in flight so far
    pub duration: Duration,
    /// Conflict retries so far
    pub retry_count: u32,
}

/// Outcome of [`TransactionCoordinator::execute`]
#[derive(Debug)]
pub struct TransactionResult<T> {
    /// Value returned by the unit of work, or the final failure
    pub result: Result<T, TxnError>,
    /// Conflict retries performed
    pub retry_count: u32,
    /// Wall time for the whole call, backoff included
    pub duration: Duration,
}

impl<T> TransactionResult<T> {
    /// Whether the transaction committed
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Committed value
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// Final failure
    pub fn error(&self) -> Option<&TxnError> {
        self.result.as_ref().err()
    }

    /// Convert into a plain `Result`
    pub fn into_result(self) -> TxnResult<T> {
        self.result
    }
}

/// Removes a registry entry when dropped
struct ActiveGuard<'c> {
    active: &'c DashMap<TxnId, TransactionRecord>,
    id: TxnId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

/// Transaction coordinator
///
/// # Memory Ordering
///
/// The metric counters use Relaxed ordering. They are observational and do not
/// synchronize any other memory operations.
pub struct TransactionCoordinator<E: StorageEngine> {
    engine: Arc<E>,
    clock: Arc<dyn Clock>,
    active: DashMap<TxnId, TransactionRecord>,
    defaults: TransactionOptions,
    long_running_threshold: Duration,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_aborted: AtomicU64,
    total_retries: AtomicU64,
}

impl<E: StorageEngine> TransactionCoordinator<E> {
    /// Create a coordinator over `engine` using the system clock
    pub fn new(engine: Arc<E>) -> Self {
        Self::with_clock(engine, Arc::new(SystemClock))
    }

    /// Create a coordinator with an explicit clock
    pub fn with_clock(engine: Arc<E>, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            clock,
            active: DashMap::new(),
            defaults: TransactionOptions::default(),
            long_running_threshold: DEFAULT_LONG_RUNNING_THRESHOLD,
            total_started: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_aborted: AtomicU64::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    /// Replace the options returned by [`options`](Self::options)
    pub fn with_defaults(mut self, defaults: TransactionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set the threshold used by [`stuck_transactions`](Self::stuck_transactions)
    pub fn with_long_running_threshold(mut self, threshold: Duration) -> Self {
        self.long_running_threshold = threshold;
        self
    }

    /// The underlying engine
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// A copy of the configured default options, ready to customize
    pub fn options(&self) -> TransactionOptions {
        self.defaults.clone()
    }

    /// Run `f` inside a transaction, retrying on conflict
    ///
    /// `f` may be invoked up to `max_retries + 1` times, so any side effect it
    /// has outside the transaction must be safe to repeat. Only conflict-class
    /// failures are retried; anything else fails the call immediately.
    ///
    /// # Example
    /// ```ignore
    /// let outcome = coordinator.execute(coordinator.options().with_name("archive"), |txn| {
    ///     let thread = txn.get("thread:42")?;
    ///     txn.put("archive:42", thread.unwrap_or_default())?;
    ///     txn.delete("thread:42")?;
    ///     Ok(())
    /// });
    /// ```
    pub fn execute<F, R>(&self, options: TransactionOptions, f: F) -> TransactionResult<R>
    where
        F: Fn(&mut TxnHandle<'_, E::Transaction>) -> TxnResult<R>,
    {
        let started = Instant::now();
        let id = TxnId::new();
        let _guard = self.register(id, options.name.clone());
        self.total_started.fetch_add(1, Ordering::Relaxed);

        debug!(target: "courier::txn", txn = %id, name = ?options.name, isolation = ?options.isolation, "Transaction started");

        let mut retry_count = 0u32;
        let result = loop {
            match self.run_attempt(id, retry_count, &options, &f) {
                Ok(value) => break Ok(value),
                Err(e) if e.is_conflict() && retry_count < options.retry.max_retries => {
                    retry_count += 1;
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    if let Some(mut record) = self.active.get_mut(&id) {
                        record.retry_count = retry_count;
                    }

                    let delay = options.retry.delay_for(retry_count);
                    warn!(target: "courier::txn", txn = %id, retry = retry_count, delay_ms = delay.as_millis() as u64, error = %e, "Conflict, retrying transaction");
                    std::thread::sleep(delay);
                }
                Err(e) if e.is_conflict() => {
                    break Err(TxnError::RetriesExhausted {
                        retries: retry_count,
                        source: Box::new(e),
                    })
                }
                Err(e) => break Err(e),
            }
        };

        let duration = started.elapsed();
        match &result {
            Ok(_) => {
                self.total_committed.fetch_add(1, Ordering::Relaxed);
                debug!(target: "courier::txn", txn = %id, retries = retry_count, duration_ms = duration.as_millis() as u64, "Transaction committed");
            }
            Err(e) => {
                self.total_aborted.fetch_add(1, Ordering::Relaxed);
                warn!(target: "courier::txn", txn = %id, name = ?options.name, retries = retry_count, kind = ?e.kind(), error = %e, "Transaction aborted");
            }
        }

        TransactionResult {
            result,
            retry_count,
            duration,
        }
    }

    /// Like [`execute`](Self::execute) but returns the value or the failure directly
    pub fn run<F, R>(&self, options: TransactionOptions, f: F) -> TxnResult<R>
    where
        F: Fn(&mut TxnHandle<'_, E::Transaction>) -> TxnResult<R>,
    {
        self.execute(options, f).into_result()
    }

    fn register(&self, id: TxnId, name: Option<String>) -> ActiveGuard<'_> {
        self.active.insert(
            id,
            TransactionRecord {
                name,
                started_at: self.clock.now(),
                retry_count: 0,
            },
        );
        ActiveGuard {
            active: &self.active,
            id,
        }
    }

    /// One open/settings/run/commit cycle
    ///
    /// Any failure before commit rolls the engine transaction back.
    fn run_attempt<F, R>(
        &self,
        id: TxnId,
        attempt: u32,
        options: &TransactionOptions,
        f: &F,
    ) -> TxnResult<R>
    where
        F: Fn(&mut TxnHandle<'_, E::Transaction>) -> TxnResult<R>,
    {
        let mut txn = self.engine.begin()?;

        if let Err(e) = apply_settings(&mut txn, options) {
            rollback_quietly(id, txn);
            return Err(e.into());
        }

        let outcome = {
            let mut handle = TxnHandle::new(&mut txn, id, attempt);
            f(&mut handle)
        };

        match outcome {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                rollback_quietly(id, txn);
                Err(e)
            }
        }
    }

    // ========== Observability ==========

    /// Number of transactions in flight
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Snapshot of every in-flight transaction, oldest first
    pub fn active_transactions(&self) -> Vec<ActiveTransaction> {
        let now = self.clock.now();
        let mut snapshot: Vec<ActiveTransaction> = self
            .active
            .iter()
            .map(|entry| {
                let record = entry.value();
                ActiveTransaction {
                    id: *entry.key(),
                    name: record.name.clone(),
                    started_at: record.started_at,
                    duration: now.saturating_duration_since(record.started_at),
                    retry_count: record.retry_count,
                }
            })
            .collect();
        snapshot.sort_by_key(|t| t.started_at);
        snapshot
    }

    /// In-flight transactions older than `threshold`
    pub fn long_running_transactions(&self, threshold: Duration) -> Vec<ActiveTransaction> {
        self.active_transactions()
            .into_iter()
            .filter(|t| t.duration > threshold)
            .collect()
    }

    /// In-flight transactions older than the configured threshold
    pub fn stuck_transactions(&self) -> Vec<ActiveTransaction> {
        self.long_running_transactions(self.long_running_threshold)
    }

    /// Emit a warning per transaction older than `threshold`
    ///
    /// Returns how many were reported.
    pub fn log_long_running(&self, threshold: Duration) -> usize {
        let stuck = self.long_running_transactions(threshold);
        for t in &stuck {
            warn!(
                target: "courier::txn",
                txn = %t.id,
                name = ?t.name,
                started_at = %t.started_at.to_rfc3339(),
                duration_ms = t.duration.as_millis() as u64,
                retries = t.retry_count,
                "Long-running transaction"
            );
        }
        stuck.len()
    }

    /// Get transaction metrics
    pub fn metrics(&self) -> TransactionMetrics {
        TransactionMetrics {
            active_count: self.active.len() as u64,
            total_started: self.total_started.load(Ordering::Relaxed),
            total_committed: self.total_committed.load(Ordering::Relaxed),
            total_aborted: self.total_aborted.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
        }
    }

    /// Wait for all in-flight transactions to finish
    ///
    /// Returns `false` if `timeout` expired first. Used during shutdown.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let sleep_duration = Duration::from_millis(1);

        while !self.active.is_empty() {
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(sleep_duration);
        }
        true
    }
}

fn apply_settings<T: EngineTransaction>(
    txn: &mut T,
    options: &TransactionOptions,
) -> EngineResult<()> {
    if let Some(level) = options.isolation {
        txn.set_isolation_level(level)?;
    }
    if options.read_only {
        txn.set_read_only(true)?;
    }
    if let Some(timeout) = options.timeout {
        txn.set_statement_timeout(timeout)?;
    }
    Ok(())
}

fn rollback_quietly<T: EngineTransaction>(id: TxnId, txn: T) {
    if let Err(e) = txn.rollback() {
        warn!(target: "courier::txn", txn = %id, error = %e, "Rollback failed");
    }
}

/// Transaction metrics
///
/// Provides statistics about transaction lifecycle.
#[derive(Debug, Clone)]
pub struct TransactionMetrics {
    /// Number of transactions in flight
    pub active_count: u64,
    /// Total calls to `execute`
    pub total_started: u64,
    /// Calls that committed
    pub total_committed: u64,
    /// Calls that failed
    pub total_aborted: u64,
    /// Conflict retries across all calls
    pub total_retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RetryConfig;
    use courier_core::{EngineError, ErrorKind, IsolationLevel, ManualClock};
    use courier_storage::MemoryEngine;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::sync::Barrier;
    use std::thread;

    fn fast_options() -> TransactionOptions {
        TransactionOptions::new().with_retry(
            RetryConfig::new()
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
    }

    fn create_coordinator() -> TransactionCoordinator<MemoryEngine> {
        TransactionCoordinator::new(Arc::new(MemoryEngine::new()))
    }

    #[test]
    fn test_coordinator_new() {
        let coordinator = create_coordinator();
        let metrics = coordinator.metrics();
        assert_eq!(metrics.active_count, 0);
        assert_eq!(metrics.total_started, 0);
        assert_eq!(metrics.total_committed, 0);
        assert_eq!(metrics.total_aborted, 0);
        assert_eq!(coordinator.active_count(), 0);
    }

    #[test]
    fn test_execute_commits() {
        let coordinator = create_coordinator();
        let outcome = coordinator.execute(fast_options(), |txn| {
            txn.put("draft:1", json!({"to": "a@example.com"}))?;
            Ok("saved")
        });

        assert!(outcome.is_success());
        assert_eq!(outcome.value(), Some(&"saved"));
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(
            coordinator.engine().read_committed("draft:1"),
            Some(json!({"to": "a@example.com"}))
        );
        assert_eq!(coordinator.active_count(), 0);
        assert_eq!(coordinator.metrics().total_committed, 1);
    }

    #[test]
    fn test_failure_rolls_back() {
        let coordinator = create_coordinator();
        let outcome: TransactionResult<()> = coordinator.execute(fast_options(), |txn| {
            txn.put("draft:1", json!(1))?;
            Err(TxnError::aborted("quota exceeded"))
        });

        assert!(!outcome.is_success());
        assert!(matches!(outcome.error(), Some(TxnError::Aborted { .. })));
        assert_eq!(coordinator.engine().read_committed("draft:1"), None);
        assert_eq!(coordinator.engine().open_transactions(), 0);
        assert_eq!(coordinator.metrics().total_aborted, 1);
    }

    #[test]
    fn test_conflict_is_retried_until_success() {
        let coordinator = create_coordinator();
        coordinator
            .engine()
            .inject_failures(ErrorKind::SerializationFailure, 2);
        let calls = AtomicU32::new(0);

        let outcome = coordinator.execute(fast_options(), |txn| {
            calls.fetch_add(1, Ordering::SeqCst);
            txn.put("counter", json!(1))?;
            Ok(txn.attempt())
        });

        assert!(outcome.is_success());
        assert_eq!(outcome.retry_count, 2);
        assert_eq!(outcome.value(), Some(&2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(coordinator.metrics().total_retries, 2);
    }

    #[test]
    fn test_retries_exhausted_after_bounded_attempts() {
        let coordinator = create_coordinator();
        coordinator.engine().inject_failures(ErrorKind::Deadlock, 100);
        let calls = AtomicU32::new(0);

        let outcome = coordinator.execute(fast_options().with_max_retries(2), |txn| {
            calls.fetch_add(1, Ordering::SeqCst);
            txn.put("k", json!(1))
        });

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.retry_count, 2);
        match outcome.into_result() {
            Err(TxnError::RetriesExhausted { retries, source }) => {
                assert_eq!(retries, 2);
                assert_eq!(source.kind(), Some(ErrorKind::Deadlock));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_non_conflict_fails_immediately() {
        let coordinator = create_coordinator();
        let calls = AtomicU32::new(0);

        let outcome: TransactionResult<()> = coordinator.execute(fast_options(), |_txn| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::other("relation does not exist").into())
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.retry_count, 0);
        assert!(matches!(outcome.error(), Some(TxnError::Engine(_))));
        assert_eq!(coordinator.metrics().total_retries, 0);
    }

    #[test]
    fn test_settings_are_applied() {
        let coordinator = create_coordinator();
        let options = fast_options()
            .with_isolation(IsolationLevel::Serializable)
            .read_only()
            .with_timeout(Duration::from_millis(5));

        let result = coordinator.run(options, |txn| txn.put("k", json!(1)));
        match result {
            Err(TxnError::Engine(e)) => assert_eq!(e.kind, ErrorKind::ReadOnlyViolation),
            other => panic!("unexpected result: {:?}", other),
        }

        let timeout = coordinator.run(
            fast_options().with_timeout(Duration::from_millis(5)),
            |txn| txn.sleep(Duration::from_millis(200)),
        );
        match timeout {
            Err(e) => assert_eq!(e.kind(), Some(ErrorKind::StatementTimeout)),
            Ok(()) => panic!("statement should have timed out"),
        }
    }

    #[test]
    fn test_concurrent_increments_all_apply() {
        let coordinator = Arc::new(create_coordinator());
        coordinator
            .run(fast_options(), |txn| txn.put("counter", json!(0)))
            .unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let options = fast_options()
                        .with_isolation(IsolationLevel::RepeatableRead)
                        .with_max_retries(100);
                    coordinator.run(options, |txn| {
                        let n = txn.get("counter")?.and_then(|v| v.as_u64()).unwrap_or(0);
                        txn.put("counter", json!(n + 1))
                    })
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(
            coordinator.engine().read_committed("counter"),
            Some(json!(threads as u64))
        );
        assert_eq!(coordinator.active_count(), 0);
    }

    #[test]
    fn test_active_record_visible_during_execution() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1_000)));
        let coordinator = Arc::new(
            TransactionCoordinator::with_clock(Arc::new(MemoryEngine::new()), clock.clone())
                .with_long_running_threshold(Duration::from_secs(30)),
        );
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let worker = {
            let coordinator = Arc::clone(&coordinator);
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                coordinator.run(fast_options().with_name("bulk-import"), |_txn| {
                    entered.wait();
                    release.wait();
                    Ok(())
                })
            })
        };

        entered.wait();
        assert_eq!(coordinator.active_count(), 1);
        assert!(coordinator.stuck_transactions().is_empty());

        clock.advance(Duration::from_secs(45));
        let active = coordinator.active_transactions();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name.as_deref(), Some("bulk-import"));
        assert_eq!(active[0].duration, Duration::from_secs(45));
        assert_eq!(coordinator.stuck_transactions().len(), 1);
        assert_eq!(coordinator.log_long_running(Duration::from_secs(60)), 0);
        assert_eq!(coordinator.log_long_running(Duration::from_secs(10)), 1);

        release.wait();
        worker.join().unwrap().unwrap();
        assert_eq!(coordinator.active_count(), 0);
    }

    #[test]
    fn test_panic_in_unit_of_work_deregisters() {
        let coordinator = Arc::new(create_coordinator());
        let worker = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                coordinator.run(fast_options(), |txn| -> TxnResult<()> {
                    txn.put("k", json!(1))?;
                    panic!("handler bug");
                })
            })
        };

        assert!(worker.join().is_err());
        assert_eq!(coordinator.active_count(), 0);
        assert_eq!(coordinator.engine().read_committed("k"), None);
        assert_eq!(coordinator.engine().open_transactions(), 0);
    }

    // ========== wait_for_idle Tests ==========

    #[test]
    fn test_wait_for_idle_no_active_transactions() {
        let coordinator = create_coordinator();
        assert!(coordinator.wait_for_idle(Duration::from_millis(100)));
    }

    #[test]
    fn test_wait_for_idle_timeout_with_active_transaction() {
        let coordinator = Arc::new(create_coordinator());
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let worker = {
            let coordinator = Arc::clone(&coordinator);
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                coordinator.run(fast_options(), |_txn| {
                    entered.wait();
                    release.wait();
                    Ok(())
                })
            })
        };

        entered.wait();
        let start = Instant::now();
        assert!(!coordinator.wait_for_idle(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));

        release.wait();
        worker.join().unwrap().unwrap();
        assert!(coordinator.wait_for_idle(Duration::from_secs(1)));
    }
}
