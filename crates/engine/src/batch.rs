//! Batch executor
//!
//! Runs an ordered list of steps inside a single coordinated transaction.
//! Either every step's writes commit or none do.

use crate::coordinator::{TransactionCoordinator, TransactionResult};
use crate::error::{TxnError, TxnResult};
use crate::handle::TxnHandle;
use crate::options::TransactionOptions;
use courier_storage::{EngineTransaction, StorageEngine};
use tracing::debug;

/// One step of a batch
pub type BatchStep<'s, T, R> = Box<dyn Fn(&mut TxnHandle<'_, T>) -> TxnResult<R> + 's>;

/// Box a closure as a [`BatchStep`]
pub fn step<'s, T, R, F>(f: F) -> BatchStep<'s, T, R>
where
    F: Fn(&mut TxnHandle<'_, T>) -> TxnResult<R> + 's,
    T: EngineTransaction,
{
    Box::new(f)
}

impl<E: StorageEngine> TransactionCoordinator<E> {
    /// Run `steps` in order inside one transaction
    ///
    /// The first failing step aborts the batch and is reported as
    /// [`TxnError::BatchStep`] with its index. A conflict in any step retries
    /// the entire batch from the first step.
    pub fn execute_batch<R>(
        &self,
        options: TransactionOptions,
        steps: &[BatchStep<'_, E::Transaction, R>],
    ) -> TransactionResult<Vec<R>> {
        self.execute(options, |txn| {
            let mut results = Vec::with_capacity(steps.len());
            for (index, step) in steps.iter().enumerate() {
                let value = step(txn).map_err(|source| TxnError::BatchStep {
                    index,
                    source: Box::new(source),
                })?;
                results.push(value);
            }
            debug!(target: "courier::txn", txn = %txn.id(), steps = steps.len(), "Batch applied");
            Ok(results)
        })
    }
}
