use crate::common::types::LogEntry;
use std::collections::VecDeque;

pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// Bounded, append-only log history. The oldest entry is evicted once
/// `capacity` is exceeded.
#[derive(Debug)]
pub struct LogFeed {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogFeed {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// 오래된 순서대로 복사본 반환
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
