//! Coordinated transactions through the public API

use courier::{
    step, BatchStep, ErrorKind, MemoryEngine, MemoryTransaction, RetryConfig,
    TransactionCoordinator, TransactionOptions, TxnError,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn coordinator() -> TransactionCoordinator<MemoryEngine> {
    TransactionCoordinator::new(Arc::new(MemoryEngine::new()))
}

fn options(base_ms: u64) -> TransactionOptions {
    TransactionOptions::new().with_retry(
        RetryConfig::new()
            .with_base_delay(Duration::from_millis(base_ms))
            .with_jitter(false),
    )
}

#[test]
fn always_conflicting_work_is_tried_max_retries_plus_one_times() {
    for max_retries in [0u32, 1, 3] {
        let coordinator = coordinator();
        coordinator
            .engine()
            .inject_failures(ErrorKind::SerializationFailure, u32::MAX);
        let attempts = AtomicU32::new(0);
        let opts = options(5).with_max_retries(max_retries);
        let floor = opts.retry.minimum_total_backoff();

        let outcome = coordinator.execute(opts, |txn| {
            attempts.fetch_add(1, Ordering::SeqCst);
            txn.put("k", json!(1))
        });

        assert_eq!(attempts.load(Ordering::SeqCst), max_retries + 1);
        assert!(outcome.duration >= floor);
        let message = outcome.error().map(|e| e.to_string()).unwrap_or_default();
        assert!(
            message.starts_with(&format!("transaction failed after {max_retries} retries")),
            "{message}"
        );
    }
}

#[test]
fn non_conflict_failure_is_not_retried() {
    let coordinator = coordinator();
    let attempts = AtomicU32::new(0);

    let outcome: courier::TransactionResult<()> = coordinator.execute(options(1), |_txn| {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(TxnError::aborted("invalid recipient"))
    });

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.retry_count, 0);
    assert_eq!(
        outcome.error().map(|e| e.user_message()),
        Some("operation failed, please retry")
    );
}

#[test]
fn rolled_back_savepoint_writes_are_invisible() {
    let coordinator = coordinator();
    let seen = coordinator
        .run(options(1), |txn| {
            txn.put("before", json!("kept"))?;
            let sp = txn.savepoint(None)?;
            txn.put("after", json!("discarded"))?;
            txn.rollback_to_savepoint(&sp)?;
            Ok((txn.get("before")?, txn.get("after")?))
        })
        .unwrap();

    assert_eq!(seen, (Some(json!("kept")), None));
    assert_eq!(coordinator.engine().read_committed("after"), None);
}

#[test]
fn batch_with_failing_second_step_leaves_no_trace() {
    let coordinator = coordinator();
    let steps: Vec<BatchStep<'_, MemoryTransaction, ()>> = vec![
        step(|txn| txn.put("step1", json!(true))),
        step(|_txn| Err(TxnError::aborted("provider rejected message"))),
        step(|txn| txn.put("step3", json!(true))),
    ];

    let outcome = coordinator.execute_batch(options(1), &steps);
    assert!(matches!(
        outcome.error(),
        Some(TxnError::BatchStep { index: 1, .. })
    ));
    assert_eq!(coordinator.engine().read_committed("step1"), None);
    assert_eq!(coordinator.engine().read_committed("step3"), None);
}

#[test]
fn active_count_reads_are_idempotent() {
    let coordinator = coordinator();
    coordinator.run(options(1), |txn| txn.put("k", json!(1))).unwrap();

    let counts: Vec<usize> = (0..5).map(|_| coordinator.active_count()).collect();
    assert_eq!(counts, vec![0; 5]);
    let before = coordinator.metrics();
    let _ = coordinator.active_count();
    let after = coordinator.metrics();
    assert_eq!(before.total_started, after.total_started);
}
