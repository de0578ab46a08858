//! Core types for Courier
//!
//! This crate defines the foundational types shared by the transaction
//! coordinator and the admission layer:
//! - ErrorKind / EngineError: structured storage-engine failures
//! - Timestamp / Clock: microsecond wall-clock time with an injectable source
//! - TxnId / IsolationLevel: transaction identity and isolation settings

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use types::{IsolationLevel, ParseIsolationError, TxnId};
