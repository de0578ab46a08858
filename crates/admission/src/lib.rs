//! Rate admission for Courier
//!
//! An in-process sliding-window limiter that admits or rejects operations
//! per caller key:
//! - WindowStore: per-key event timestamps with lazy pruning
//! - Preset / PresetTable: named limits (api, auth, password_reset, webhook)
//! - RateAdmissionService: key derivation, bypass, response headers
//! - WindowSweeper: background removal of fully stale entries
//!
//! State is per process. Several processes behind a load balancer each
//! enforce their own budget.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod preset;
pub mod service;
pub mod sweeper;
pub mod window;

pub use preset::{ParsePresetError, Preset, PresetTable};
pub use service::{AdmissionPolicy, CallerContext, RateAdmissionService};
pub use sweeper::{WindowSweeper, DEFAULT_SWEEP_INTERVAL};
pub use window::{Admission, RateLimit, WindowStore};
