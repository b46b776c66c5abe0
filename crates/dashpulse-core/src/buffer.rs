//! Bounded per-key history of accepted updates.
//!
//! The buffer is a recency log for offline display and post-reconnect replay.
//! It plays no part in conflict resolution.

use crate::model::{DataUpdate, StateKey, Timestamp};
use dashpulse_protocol::DataMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// Default number of entries kept per key.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10;

/// A buffered (data, timestamp) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferedEntry {
    pub data: DataMap,
    pub timestamp: Timestamp,
}

impl From<&DataUpdate> for BufferedEntry {
    fn from(update: &DataUpdate) -> Self {
        Self {
            data: update.data.clone(),
            timestamp: update.timestamp,
        }
    }
}

/// FIFO queues keyed by (dashboard type, filter-set).
#[derive(Debug)]
pub struct DataBuffer {
    queues: HashMap<StateKey, VecDeque<BufferedEntry>>,
    capacity: usize,
}

impl DataBuffer {
    /// Create a buffer with the default per-key capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a buffer keeping at most `capacity` entries per key.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queues: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push an update, evicting the oldest entry once the key is full.
    ///
    /// Returns the evicted entry, if any.
    pub fn append(&mut self, key: StateKey, update: &DataUpdate) -> Option<BufferedEntry> {
        let capacity = self.capacity;
        let queue = self.queues.entry(key).or_default();
        queue.push_back(BufferedEntry::from(update));

        if queue.len() > capacity {
            let evicted = queue.pop_front();
            trace!(capacity, "Evicted oldest buffered entry");
            evicted
        } else {
            None
        }
    }

    /// Copy of the entries held for a key, oldest first.
    #[must_use]
    pub fn get(&self, key: &StateKey) -> Vec<BufferedEntry> {
        self.queues
            .get(key)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entries held for a key.
    #[must_use]
    pub fn len(&self, key: &StateKey) -> usize {
        self.queues.get(key).map_or(0, VecDeque::len)
    }

    /// Total entries across all keys.
    #[must_use]
    pub fn total(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Entry count per key.
    #[must_use]
    pub fn counts(&self) -> Vec<(StateKey, usize)> {
        self.queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(k, q)| (k.clone(), q.len()))
            .collect()
    }

    /// Take every queue, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<(StateKey, Vec<BufferedEntry>)> {
        self.queues
            .drain()
            .filter(|(_, q)| !q.is_empty())
            .map(|(k, q)| (k, q.into_iter().collect()))
            .collect()
    }

    /// Empty all queues.
    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

impl Default for DataBuffer {
    fn default() -> Self {
        Self::new()
    }
}
