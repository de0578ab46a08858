//! Storage engine layer for Courier
//!
//! This crate defines the storage engine collaborator the transaction
//! coordinator drives, and ships an in-memory implementation:
//! - StorageEngine / EngineTransaction: open, configure, execute, commit,
//!   rollback and savepoint primitives
//! - Statement / Output: the statement vocabulary understood by engines
//! - MemoryEngine: multi-version in-memory engine with snapshot isolation,
//!   serializable validation, savepoints and failure injection
//! - VersionChain: per-key version history used by MemoryEngine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod engine;
pub mod memory;

pub use chain::VersionChain;
pub use engine::{EngineTransaction, Output, Statement, StorageEngine};
pub use memory::{MemoryEngine, MemoryTransaction};
