//! In-memory multi-version storage engine
//!
//! `MemoryEngine` keeps a [`VersionChain`] per key and a single global commit
//! version. Transactions buffer their writes and apply them atomically at
//! commit under a commit lock, getting one new version for all keys.
//!
//! # Isolation
//!
//! | Level | Reads | Commit validation |
//! |-------|-------|-------------------|
//! | read uncommitted / read committed | latest committed, per statement | none |
//! | repeatable read | snapshot taken at the first statement | written keys unchanged since snapshot |
//! | serializable | snapshot taken at the first statement | written keys, read keys and scanned prefixes unchanged |
//!
//! Read uncommitted is promoted to read committed; uncommitted writes are
//! never visible to other transactions.
//!
//! # Savepoints
//!
//! Savepoints form a stack. Rolling back to a savepoint restores the write
//! buffer captured when it was created and discards later savepoints; the
//! savepoint itself stays live. Releasing a savepoint discards it and every
//! later savepoint while keeping the writes.

use crate::chain::VersionChain;
use crate::engine::{EngineTransaction, Output, Statement, StorageEngine};
use courier_core::{EngineError, EngineResult, ErrorKind, IsolationLevel};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

type WriteBuffer = BTreeMap<String, Option<Value>>;

struct EngineInner {
    data: RwLock<BTreeMap<String, VersionChain>>,
    /// Highest committed version; published after the writes are applied
    version: AtomicU64,
    commit_lock: Mutex<()>,
    injected: Mutex<Option<(ErrorKind, u32)>>,
    open: AtomicUsize,
    default_isolation: IsolationLevel,
}

impl EngineInner {
    fn take_injected(&self) -> Option<ErrorKind> {
        let mut injected = self.injected.lock();
        match injected.as_mut() {
            Some((kind, remaining)) if *remaining > 0 => {
                let kind = *kind;
                *remaining -= 1;
                if *remaining == 0 {
                    *injected = None;
                }
                Some(kind)
            }
            _ => None,
        }
    }
}

/// In-memory engine; cheap to clone, clones share the same data
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

impl MemoryEngine {
    /// Create an empty engine defaulting to read committed
    pub fn new() -> Self {
        Self::with_default_isolation(IsolationLevel::ReadCommitted)
    }

    /// Create an empty engine with a different default isolation level
    pub fn with_default_isolation(level: IsolationLevel) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                data: RwLock::new(BTreeMap::new()),
                version: AtomicU64::new(0),
                commit_lock: Mutex::new(()),
                injected: Mutex::new(None),
                open: AtomicUsize::new(0),
                default_isolation: level,
            }),
        }
    }

    /// Make the next `count` commits fail with `kind`
    ///
    /// Simulates deadlocks and serialization failures that real engines
    /// report at commit time. Replaces any pending injection.
    pub fn inject_failures(&self, kind: ErrorKind, count: u32) {
        *self.inner.injected.lock() = (count > 0).then_some((kind, count));
    }

    /// Highest committed version
    pub fn committed_version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Latest committed value of a key, outside any transaction
    pub fn read_committed(&self, key: &str) -> Option<Value> {
        let version = self.committed_version();
        self.inner
            .data
            .read()
            .get(key)
            .and_then(|chain| chain.get_at(version).cloned())
    }

    /// Number of transactions opened and not yet finished or dropped
    pub fn open_transactions(&self) -> usize {
        self.inner.open.load(Ordering::Acquire)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for MemoryEngine {
    type Transaction = MemoryTransaction;

    fn begin(&self) -> EngineResult<MemoryTransaction> {
        self.inner.open.fetch_add(1, Ordering::AcqRel);
        Ok(MemoryTransaction {
            engine: Arc::clone(&self.inner),
            isolation: self.inner.default_isolation,
            read_only: false,
            statement_timeout: None,
            snapshot: None,
            started: false,
            read_keys: HashSet::new(),
            read_prefixes: Vec::new(),
            writes: WriteBuffer::new(),
            savepoints: Vec::new(),
            finished: false,
        })
    }
}

/// Transaction opened by [`MemoryEngine`]
pub struct MemoryTransaction {
    engine: Arc<EngineInner>,
    isolation: IsolationLevel,
    read_only: bool,
    statement_timeout: Option<Duration>,
    snapshot: Option<u64>,
    started: bool,
    read_keys: HashSet<String>,
    read_prefixes: Vec<String>,
    writes: WriteBuffer,
    savepoints: Vec<(String, WriteBuffer)>,
    finished: bool,
}

impl MemoryTransaction {
    /// Isolation level in effect
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Whether writes are rejected
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Statement timeout in effect, if any
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout
    }

    /// Names of live savepoints, oldest first
    pub fn savepoint_names(&self) -> Vec<String> {
        self.savepoints.iter().map(|(name, _)| name.clone()).collect()
    }

    fn read_version(&mut self) -> u64 {
        let engine = &self.engine;
        if self.isolation.uses_snapshot() {
            *self
                .snapshot
                .get_or_insert_with(|| engine.version.load(Ordering::Acquire))
        } else {
            engine.version.load(Ordering::Acquire)
        }
    }

    fn tracks_reads(&self) -> bool {
        self.isolation == IsolationLevel::Serializable
    }

    fn read_key(&mut self, key: &str) -> Option<Value> {
        if let Some(buffered) = self.writes.get(key) {
            return buffered.clone();
        }
        let version = self.read_version();
        if self.tracks_reads() {
            self.read_keys.insert(key.to_string());
        }
        self.engine
            .data
            .read()
            .get(key)
            .and_then(|chain| chain.get_at(version).cloned())
    }

    fn scan_prefix(&mut self, prefix: &str) -> Vec<(String, Value)> {
        let version = self.read_version();
        if self.tracks_reads() {
            self.read_prefixes.push(prefix.to_string());
        }
        let mut rows: BTreeMap<String, Value> = {
            let data = self.engine.data.read();
            data.range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .filter_map(|(key, chain)| chain.get_at(version).map(|v| (key.clone(), v.clone())))
                .collect()
        };
        for (key, buffered) in self
            .writes
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match buffered {
                Some(value) => {
                    rows.insert(key.clone(), value.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        rows.into_iter().collect()
    }

    fn check_writable(&self) -> EngineResult<()> {
        if self.read_only {
            return Err(EngineError::new(
                ErrorKind::ReadOnlyViolation,
                "cannot execute write in a read-only transaction",
            ));
        }
        Ok(())
    }

    fn validate(&self, data: &BTreeMap<String, VersionChain>, snapshot: u64) -> EngineResult<()> {
        let changed = |key: &str| data.get(key).is_some_and(|c| c.modified_after(snapshot));

        if let Some(key) = self.writes.keys().find(|key| changed(key)) {
            return Err(EngineError::serialization(format!(
                "could not serialize access due to concurrent update of {key}"
            )));
        }

        if self.tracks_reads() {
            let read_conflict = self.read_keys.iter().any(|key| changed(key))
                || self.read_prefixes.iter().any(|prefix| {
                    data.range(prefix.clone()..)
                        .take_while(|(key, _)| key.starts_with(prefix.as_str()))
                        .any(|(_, chain)| chain.modified_after(snapshot))
                });
            if read_conflict {
                return Err(EngineError::serialization(
                    "could not serialize access due to read/write dependencies among transactions",
                ));
            }
        }
        Ok(())
    }
}

impl EngineTransaction for MemoryTransaction {
    fn set_isolation_level(&mut self, level: IsolationLevel) -> EngineResult<()> {
        if self.started {
            return Err(EngineError::new(
                ErrorKind::InvalidSetting,
                "isolation level must be set before any query",
            ));
        }
        self.isolation = level;
        Ok(())
    }

    fn set_read_only(&mut self, read_only: bool) -> EngineResult<()> {
        if !read_only && self.read_only && self.started {
            return Err(EngineError::new(
                ErrorKind::InvalidSetting,
                "cannot make a started read-only transaction writable",
            ));
        }
        self.read_only = read_only;
        Ok(())
    }

    fn set_statement_timeout(&mut self, timeout: Duration) -> EngineResult<()> {
        // zero disables the timeout
        self.statement_timeout = (!timeout.is_zero()).then_some(timeout);
        Ok(())
    }

    fn execute(&mut self, statement: Statement) -> EngineResult<Output> {
        self.started = true;
        match statement {
            Statement::Get(key) => Ok(Output::Value(self.read_key(&key))),
            Statement::Put(key, value) => {
                self.check_writable()?;
                self.writes.insert(key, Some(value));
                Ok(Output::Affected(1))
            }
            Statement::Delete(key) => {
                self.check_writable()?;
                let existed = self.read_key(&key).is_some();
                self.writes.insert(key, None);
                Ok(Output::Affected(u64::from(existed)))
            }
            Statement::Scan(prefix) => Ok(Output::Rows(self.scan_prefix(&prefix))),
            Statement::Sleep(duration) => match self.statement_timeout {
                Some(limit) if duration > limit => {
                    std::thread::sleep(limit);
                    Err(EngineError::new(
                        ErrorKind::StatementTimeout,
                        format!("canceling statement due to statement timeout ({limit:?})"),
                    ))
                }
                _ => {
                    std::thread::sleep(duration);
                    Ok(Output::Empty)
                }
            },
        }
    }

    fn create_savepoint(&mut self, name: &str) -> EngineResult<()> {
        if self.savepoints.iter().any(|(existing, _)| existing == name) {
            return Err(EngineError::new(
                ErrorKind::DuplicateSavepoint,
                format!("savepoint \"{name}\" already exists"),
            ));
        }
        self.savepoints.push((name.to_string(), self.writes.clone()));
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> EngineResult<()> {
        let idx = self.savepoint_index(name)?;
        self.savepoints.truncate(idx);
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> EngineResult<()> {
        let idx = self.savepoint_index(name)?;
        self.writes = self.savepoints[idx].1.clone();
        self.savepoints.truncate(idx + 1);
        Ok(())
    }

    fn commit(mut self) -> EngineResult<()> {
        self.finished = true;
        let engine = Arc::clone(&self.engine);
        let _commit = engine.commit_lock.lock();

        if let Some(kind) = engine.take_injected() {
            return Err(EngineError::new(kind, "injected commit failure"));
        }
        if self.writes.is_empty() {
            trace!(target: "courier::storage", "Read-only commit");
            return Ok(());
        }

        let mut data = engine.data.write();
        if let Some(snapshot) = self.snapshot {
            self.validate(&data, snapshot)?;
        }

        let version = engine.version.load(Ordering::Acquire) + 1;
        let writes = std::mem::take(&mut self.writes);
        let key_count = writes.len();
        for (key, value) in writes {
            data.entry(key).or_default().push(version, value);
        }
        engine.version.store(version, Ordering::Release);
        debug!(target: "courier::storage", version, keys = key_count, "Committed");
        Ok(())
    }

    fn rollback(mut self) -> EngineResult<()> {
        self.finished = true;
        trace!(target: "courier::storage", discarded = self.writes.len(), "Rolled back");
        Ok(())
    }
}

impl MemoryTransaction {
    fn savepoint_index(&self, name: &str) -> EngineResult<usize> {
        self.savepoints
            .iter()
            .rposition(|(existing, _)| existing == name)
            .ok_or_else(|| {
                EngineError::new(
                    ErrorKind::UnknownSavepoint,
                    format!("savepoint \"{name}\" does not exist"),
                )
            })
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.engine.open.fetch_sub(1, Ordering::AcqRel);
        if !self.finished {
            trace!(target: "courier::storage", "Dropped unfinished transaction");
        }
    }
}
