use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub const DEFAULT_SCROLLBACK_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScrollbackError {
    #[error("message id {requested} is ahead of history (last id is {total})")]
    AheadOfHistory { requested: u64, total: u64 },
}

/// Bounded, sequence-numbered message history.
///
/// Sequence ids start at 1. The entry at the front of the ring always has id
/// `total - len + 1`, so retained entries stay contiguous in id space no
/// matter how many older ones were evicted.
pub struct Scrollback {
    inner: Mutex<Inner>,
}

struct Inner {
    capacity: usize,
    entries: VecDeque<String>,
    total: u64,
}

impl Inner {
    fn evicted(&self) -> u64 {
        self.total - self.entries.len() as u64
    }
}

impl Scrollback {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                capacity,
                entries: VecDeque::with_capacity(capacity),
                total: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a line and returns its sequence id.
    pub fn append(&self, line: impl Into<String>) -> u64 {
        let mut inner = self.lock();
        if inner.entries.len() == inner.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(line.into());
        inner.total += 1;
        inner.total
    }

    /// Appends several lines under one lock so they stay adjacent.
    pub fn append_all<I, S>(&self, lines: I) -> u64
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.lock();
        for line in lines {
            if inner.entries.len() == inner.capacity {
                inner.entries.pop_front();
            }
            inner.entries.push_back(line.into());
            inner.total += 1;
        }
        inner.total
    }

    /// Entries with an id greater than `last_seen`, oldest first.
    ///
    /// `Ok(None)` means the caller is already current. An id that points into
    /// the evicted region yields every retained entry.
    pub fn since(&self, last_seen: u64) -> Result<Option<Vec<String>>, ScrollbackError> {
        Ok(self.delta(last_seen)?.map(|(_, lines)| lines))
    }

    /// Like [`Scrollback::since`], also returning the id of the newest
    /// entry from the same lock acquisition so pollers never skip lines.
    pub fn delta(&self, last_seen: u64) -> Result<Option<(u64, Vec<String>)>, ScrollbackError> {
        let inner = self.lock();
        if last_seen > inner.total {
            return Err(ScrollbackError::AheadOfHistory {
                requested: last_seen,
                total: inner.total,
            });
        }
        if last_seen == inner.total {
            return Ok(None);
        }
        let skip = last_seen.saturating_sub(inner.evicted()) as usize;
        let lines = inner.entries.iter().skip(skip).cloned().collect();
        Ok(Some((inner.total, lines)))
    }

    /// Last id handed out together with every retained entry.
    pub fn snapshot(&self) -> (u64, Vec<String>) {
        let inner = self.lock();
        (inner.total, inner.entries.iter().cloned().collect())
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.total = 0;
    }

    pub fn total(&self) -> u64 {
        self.lock().total
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLLBACK_CAPACITY)
    }
}
