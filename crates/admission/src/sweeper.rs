//! Window cleanup background task
//!
//! [`WindowSweeper`] runs in a background thread and periodically removes
//! window entries whose events have all expired, so idle callers do not keep
//! memory alive.
//!
//! The thread sleeps in short slices and checks an atomic flag between them,
//! so shutdown takes effect quickly even with a long sweep interval.

use crate::window::WindowStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Default time between sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Background window cleanup task
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(WindowStore::new());
/// let sweeper = WindowSweeper::new(Arc::clone(&store), Duration::from_secs(60));
/// let handle = sweeper.start();
///
/// // ... serve requests ...
///
/// sweeper.shutdown();
/// handle.join().unwrap();
/// ```
pub struct WindowSweeper {
    store: Arc<WindowStore>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl WindowSweeper {
    /// Create a sweeper for `store`
    ///
    /// Intervals below one millisecond are raised to one millisecond.
    pub fn new(store: Arc<WindowStore>, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.max(Duration::from_millis(1)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Time between sweeps
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the background thread
    ///
    /// The thread runs until [`shutdown`](Self::shutdown) is called. The first
    /// sweep happens one interval after start.
    pub fn start(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        info!(target: "courier::admission", interval_ms = interval.as_millis() as u64, "Window sweeper started");
        thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                let slice = Duration::from_millis(100).min(interval);
                let mut elapsed = Duration::ZERO;

                while elapsed < interval {
                    if shutdown.load(Ordering::Relaxed) {
                        info!(target: "courier::admission", "Window sweeper stopped");
                        return;
                    }
                    thread::sleep(slice);
                    elapsed += slice;
                }

                let removed = store.sweep();
                debug!(target: "courier::admission", removed, remaining = store.len(), "Swept rate windows");
            }
            info!(target: "courier::admission", "Window sweeper stopped");
        })
    }

    /// Signal shutdown
    ///
    /// The background thread exits within one sleep slice.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
