//! Savepoint controller
//!
//! Partial rollback inside a transaction owned by the coordinator. Names are
//! either supplied by the caller (and must be SQL identifiers) or generated
//! from a process-wide counter as `sp_<n>`.
//!
//! Failures here are never retried. They surface as
//! [`TxnError::Savepoint`] and the caller decides whether to abort the
//! enclosing unit of work.

use crate::error::{TxnError, TxnResult};
use crate::handle::TxnHandle;
use courier_storage::EngineTransaction;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Longest identifier accepted by PostgreSQL-compatible engines
pub const MAX_SAVEPOINT_NAME_LEN: usize = 63;

static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh savepoint name
///
/// Unique across the process for its lifetime.
pub fn generate_name() -> String {
    let n = SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("sp_{}", n)
}

/// Check that `name` is usable as a savepoint identifier
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to [`MAX_SAVEPOINT_NAME_LEN`] bytes.
pub fn validate_name(name: &str) -> TxnResult<()> {
    let invalid = |reason| TxnError::InvalidSavepointName {
        name: name.to_string(),
        reason,
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("name is empty")),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err(invalid("must start with a letter or underscore"))
        }
        Some(_) => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("only letters, digits and underscores are allowed"));
    }
    if name.len() > MAX_SAVEPOINT_NAME_LEN {
        return Err(invalid("longer than 63 bytes"));
    }
    Ok(())
}

/// Create a savepoint, generating a name when none is given
///
/// Returns the name actually used.
pub fn create_savepoint<T: EngineTransaction>(
    handle: &mut TxnHandle<'_, T>,
    name: Option<&str>,
) -> TxnResult<String> {
    let name = match name {
        Some(name) => {
            validate_name(name)?;
            name.to_string()
        }
        None => generate_name(),
    };

    let txn_id = handle.id();
    handle
        .transaction()
        .create_savepoint(&name)
        .map_err(|source| {
            warn!(target: "courier::savepoint", txn = %txn_id, savepoint = %name, error = %source, "Savepoint create failed");
            TxnError::Savepoint {
                name: name.clone(),
                source,
            }
        })?;

    debug!(target: "courier::savepoint", txn = %txn_id, savepoint = %name, "Savepoint created");
    Ok(name)
}

/// Release a savepoint and every savepoint created after it
pub fn release_savepoint<T: EngineTransaction>(
    handle: &mut TxnHandle<'_, T>,
    name: &str,
) -> TxnResult<()> {
    validate_name(name)?;
    let txn_id = handle.id();
    handle
        .transaction()
        .release_savepoint(name)
        .map_err(|source| {
            warn!(target: "courier::savepoint", txn = %txn_id, savepoint = %name, error = %source, "Savepoint release failed");
            TxnError::Savepoint {
                name: name.to_string(),
                source,
            }
        })?;

    debug!(target: "courier::savepoint", txn = %txn_id, savepoint = %name, "Savepoint released");
    Ok(())
}

/// Undo every write made after the savepoint
///
/// The savepoint stays live and may be rolled back to again.
pub fn rollback_to_savepoint<T: EngineTransaction>(
    handle: &mut TxnHandle<'_, T>,
    name: &str,
) -> TxnResult<()> {
    validate_name(name)?;
    let txn_id = handle.id();
    handle
        .transaction()
        .rollback_to_savepoint(name)
        .map_err(|source| {
            warn!(target: "courier::savepoint", txn = %txn_id, savepoint = %name, error = %source, "Savepoint rollback failed");
            TxnError::Savepoint {
                name: name.to_string(),
                source,
            }
        })?;

    debug!(target: "courier::savepoint", txn = %txn_id, savepoint = %name, "Rolled back to savepoint");
    Ok(())
}
