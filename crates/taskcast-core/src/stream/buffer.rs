//! Bounded per-task replay buffer.

use std::collections::VecDeque;

use crate::domain::StreamEvent;

/// Keeps the most recent `capacity` events of one task.
///
/// Eviction is independent of subscribers: a late subscriber past the cap
/// starts at the oldest event still held.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    events: VecDeque<StreamEvent>,
    capacity: usize,
    evicted: u64,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, event: StreamEvent) {
        self.events.push_back(event);
        while self.events.len() > self.capacity {
            self.events.pop_front();
            self.evicted += 1;
        }
    }

    /// Everything still buffered, oldest first.
    pub fn snapshot(&self) -> VecDeque<StreamEvent> {
        self.events.clone()
    }

    /// The most recent `limit` events (all when `None`), oldest first.
    pub fn recent(&self, limit: Option<usize>) -> Vec<StreamEvent> {
        let skip = limit.map_or(0, |n| self.events.len().saturating_sub(n));
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events dropped because the buffer was full.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.events.back().map(|e| e.sequence_number)
    }
}
