//! Bounded ring of recent field snapshots for scrubbing.

use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

use crate::diagnostics::{FrameHash, SolverData};
use crate::field::{FieldData, Step};

/// Default number of snapshots retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Errors raised when addressing the history buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("history index {index} not found (buffer holds {len} entries)")]
    NotFound { index: usize, len: usize },
}

/// One recorded tick.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub step: Step,
    pub field: Arc<FieldData>,
    pub metrics: SolverData,
    pub frame_hash: FrameHash,
}

/// FIFO of the most recent snapshots; indices are relative to the oldest retained entry.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    evicted: u64,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries evicted since the last clear.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.evicted
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(entry);
    }

    pub fn get(&self, index: usize) -> Result<&HistoryEntry, HistoryError> {
        self.entries.get(index).ok_or(HistoryError::NotFound {
            index,
            len: self.entries.len(),
        })
    }

    /// Entry at `index`, clamped into the retained range. `None` only when empty.
    #[must_use]
    pub fn seek(&self, index: usize) -> Option<&HistoryEntry> {
        let last = self.entries.len().checked_sub(1)?;
        self.entries.get(index.min(last))
    }

    /// Absolute push ordinal of the entry at relative `index`.
    #[must_use]
    pub fn absolute_index(&self, index: usize) -> u64 {
        self.evicted + index as u64
    }

    #[must_use]
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.evicted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step: u64) -> HistoryEntry {
        let field = FieldData::new(16, 16, step as f64).expect("field");
        HistoryEntry {
            step: Step(step),
            field: Arc::new(field),
            metrics: SolverData::default(),
            frame_hash: FrameHash(step),
        }
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut history = HistoryBuffer::default();
        for step in 0..150 {
            history.push(entry(step));
        }
        assert_eq!(history.len(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(history.get(0).expect("oldest").step, Step(50));
        assert_eq!(history.latest().expect("latest").step, Step(149));
        assert_eq!(history.offset(), 50);
        assert_eq!(history.absolute_index(0), 50);
    }

    #[test]
    fn get_reports_missing_index() {
        let mut history = HistoryBuffer::with_capacity(4);
        history.push(entry(0));
        assert_eq!(
            history.get(3).map(|e| e.step),
            Err(HistoryError::NotFound { index: 3, len: 1 })
        );
    }

    #[test]
    fn seek_clamps_to_newest() {
        let mut history = HistoryBuffer::with_capacity(8);
        assert!(history.seek(0).is_none());
        for step in 0..5 {
            history.push(entry(step));
        }
        assert_eq!(history.seek(2).expect("entry").step, Step(2));
        assert_eq!(history.seek(1_000).expect("entry").step, Step(4));
    }

    #[test]
    fn clear_resets_offset() {
        let mut history = HistoryBuffer::with_capacity(2);
        for step in 0..5 {
            history.push(entry(step));
        }
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.offset(), 0);
    }
}
