//! Courier comprehensive tests
//!
//! End-to-end behavior through the public `courier` API:
//! - admission: window limits, sliding, presets, keys, bypass, headers
//! - transactions: retry bounds, savepoints, batches, registry
//! - context: configuration wiring, sweeper and shutdown

mod admission;
mod context;
mod transactions;
