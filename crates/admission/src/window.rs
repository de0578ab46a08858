//! Sliding-window event store
//!
//! Each key keeps the timestamps of its events, oldest first, rejected ones
//! included. An event at `t` counts against the key while `now - t < window`. Stale
//! timestamps are pruned lazily on every check and entries that are entirely
//! stale are removed by [`WindowStore::sweep`].
//!
//! Decisions for one key are serialized by the map shard lock held for the
//! duration of [`WindowStore::check`].

use courier_core::{Clock, SystemClock, Timestamp};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Events allowed per trailing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimit {
    /// Events admitted per window
    pub max_events: u32,
    /// Window length
    pub window: Duration,
}

impl RateLimit {
    /// Create a limit
    pub const fn new(max_events: u32, window: Duration) -> Self {
        Self { max_events, window }
    }

    /// `max_events` per minute
    pub const fn per_minute(max_events: u32) -> Self {
        Self::new(max_events, Duration::from_secs(60))
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Whether the event was admitted
    pub success: bool,
    /// Configured maximum per window
    pub limit: u32,
    /// Events still available in the current window (0 on rejection)
    pub remaining: u32,
    /// When the oldest counted event leaves the window
    pub reset_time: Timestamp,
    /// How long to wait before retrying (rejections only)
    pub retry_after: Option<Duration>,
}

impl Admission {
    /// Admission granted without consulting the store
    pub fn unrestricted(limit: RateLimit, now: Timestamp) -> Self {
        Self {
            success: true,
            limit: limit.max_events,
            remaining: limit.max_events,
            reset_time: now.saturating_add(limit.window),
            retry_after: None,
        }
    }

    /// `retry_after` in whole seconds, rounded up
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| {
            let secs = d.as_secs();
            if d.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        })
    }

    /// Standard rate limit response headers
    ///
    /// `Retry-After` is present only on rejection.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_time.as_secs_ceil().to_string()),
        ];
        if let Some(secs) = self.retry_after_secs() {
            headers.push(("Retry-After", secs.to_string()));
        }
        headers
    }

    /// Text safe to show an end user; `None` when admitted
    pub fn user_message(&self) -> Option<String> {
        self.retry_after_secs()
            .filter(|_| !self.success)
            .map(|secs| format!("too many requests, retry after {secs} seconds"))
    }
}

#[derive(Debug)]
struct WindowEntry {
    timestamps: VecDeque<Timestamp>,
    window_end: Timestamp,
    window: Duration,
}

impl WindowEntry {
    fn new(window: Duration) -> Self {
        Self {
            timestamps: VecDeque::new(),
            window_end: Timestamp::EPOCH,
            window,
        }
    }

    fn prune(&mut self, now: Timestamp) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) < self.window {
                break;
            }
            self.timestamps.pop_front();
        }
    }
}

/// Per-key sliding windows
pub struct WindowStore {
    entries: DashMap<String, WindowEntry>,
    clock: Arc<dyn Clock>,
}

impl WindowStore {
    /// Create an empty store on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store on an explicit clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Record one event for `key` and decide whether it is admitted
    ///
    /// The event is appended whether or not it is admitted, so a caller that
    /// keeps hitting a closed window keeps it closed. The clock is read while
    /// the key's shard lock is held, keeping each list non-decreasing.
    pub fn check(&self, key: &str, limit: RateLimit) -> Admission {
        if limit.max_events == 0 {
            let now = self.clock.now();
            return Admission {
                success: false,
                limit: 0,
                remaining: 0,
                reset_time: now.saturating_add(limit.window),
                retry_after: Some(limit.window),
            };
        }

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry::new(limit.window));
        let now = self.clock.now();
        entry.window = limit.window;
        entry.prune(now);
        entry.timestamps.push_back(now);
        entry.window_end = now.saturating_add(limit.window);

        let count = entry.timestamps.len() as u64;
        let max = u64::from(limit.max_events);
        let success = count <= max;

        let reset_time = entry
            .timestamps
            .front()
            .map_or(entry.window_end, |oldest| oldest.saturating_add(limit.window));

        Admission {
            success,
            limit: limit.max_events,
            remaining: max.saturating_sub(count) as u32,
            reset_time,
            retry_after: (!success).then(|| reset_time.saturating_duration_since(now)),
        }
    }

    /// Number of events currently counted for `key`, without recording one
    pub fn usage(&self, key: &str) -> usize {
        let now = self.clock.now();
        self.entries.get(key).map_or(0, |entry| {
            entry
                .timestamps
                .iter()
                .filter(|t| now.saturating_duration_since(**t) < entry.window)
                .count()
        })
    }

    /// Forget all events for `key`
    ///
    /// Returns whether the key had an entry.
    pub fn reset(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry whose newest event has left its window
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            if entry.window_end <= now {
                return false;
            }
            entry.prune(now);
            true
        });
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new()
    }
}
