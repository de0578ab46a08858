//! Per-key version history
//!
//! Every committed write to a key pushes a new entry carrying the commit
//! version. Deletes push a tombstone so snapshot readers older than the
//! delete still see the value.

use serde_json::Value;
use std::collections::VecDeque;

/// Version chain for one key, newest first
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    versions: VecDeque<(u64, Option<Value>)>,
}

impl VersionChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed write (`None` = delete)
    ///
    /// `version` must be newer than every version already in the chain.
    pub fn push(&mut self, version: u64, value: Option<Value>) {
        debug_assert!(self.latest_version().map_or(true, |v| v < version));
        self.versions.push_front((version, value));
    }

    /// Value visible to a reader at `max_version`
    ///
    /// Returns `None` both when the key did not exist yet and when it was
    /// deleted at or before `max_version`.
    pub fn get_at(&self, max_version: u64) -> Option<&Value> {
        self.versions
            .iter()
            .find(|(v, _)| *v <= max_version)
            .and_then(|(_, value)| value.as_ref())
    }

    /// Version of the newest committed write, tombstones included
    pub fn latest_version(&self) -> Option<u64> {
        self.versions.front().map(|(v, _)| *v)
    }

    /// Whether the key was written after `version`
    pub fn modified_after(&self, version: u64) -> bool {
        self.latest_version().is_some_and(|v| v > version)
    }

    /// Number of retained versions
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether the chain has no versions
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
