//! Bounded in-memory index of recent audio artifacts.
//!
//! Purely observational: evicting a record never touches the file on disk.

use std::collections::VecDeque;

use parking_lot::Mutex;
use speechster_types::AudioArtifact;

/// Number of records retained before the oldest is evicted.
pub const DEFAULT_INDEX_CAPACITY: usize = 1000;

/// Ring buffer of the most recent [`AudioArtifact`] records, oldest first.
pub struct AudioIndex {
    records: Mutex<VecDeque<AudioArtifact>>,
    capacity: usize,
}

impl AudioIndex {
    /// Create an index holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append `artifact`, evicting and returning the oldest record when full.
    pub fn push(&self, artifact: AudioArtifact) -> Option<AudioArtifact> {
        let mut records = self.records.lock();
        records.push_back(artifact);
        if records.len() > self.capacity {
            records.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The most recently inserted record.
    pub fn latest(&self) -> Option<AudioArtifact> {
        self.records.lock().back().cloned()
    }

    /// Copy of all retained records, oldest first.
    pub fn snapshot(&self) -> Vec<AudioArtifact> {
        self.records.lock().iter().cloned().collect()
    }
}

impl Default for AudioIndex {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_CAPACITY)
    }
}
