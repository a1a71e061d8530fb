//! In-memory buffer for entries recorded before file output is enabled

use std::collections::VecDeque;

use crate::entry::Entry;

/// Ordered buffer of pending entries
///
/// Unbounded unless a capacity is given, in which case the oldest entries
/// are dropped to make room.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    entries: VecDeque<Entry>,
    max_entries: Option<usize>,
    dropped: u64,
}

impl PendingBuffer {
    /// Create a buffer, optionally capped at `max_entries`
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries,
            dropped: 0,
        }
    }

    /// Append an entry, evicting the oldest one if at capacity
    pub fn push(&mut self, entry: Entry) {
        if let Some(max) = self.max_entries {
            if max == 0 {
                self.dropped += 1;
                return;
            }
            while self.entries.len() >= max {
                self.entries.pop_front();
                self.dropped += 1;
            }
        }
        self.entries.push_back(entry);
    }

    /// Take every buffered entry in insertion order, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<Entry> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted because of the capacity bound
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Drop-count since the last call, resetting it
    pub fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }
}
