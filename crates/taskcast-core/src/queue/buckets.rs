//! Per-priority FIFO lanes.

use std::collections::VecDeque;

use super::stats::PendingByPriority;
use crate::domain::{Priority, TaskId};

/// One FIFO per [`Priority`]; holds task ids only.
#[derive(Debug, Default)]
pub struct PriorityBuckets {
    lanes: [VecDeque<TaskId>; 4],
}

fn lane(priority: Priority) -> usize {
    match priority {
        Priority::Low => 0,
        Priority::Medium => 1,
        Priority::High => 2,
        Priority::Urgent => 3,
    }
}

impl PriorityBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, task_id: TaskId, priority: Priority) {
        self.lanes[lane(priority)].push_back(task_id);
    }

    /// Oldest id from the most urgent non-empty lane.
    pub fn pop_next(&mut self) -> Option<TaskId> {
        Priority::DISPATCH_ORDER
            .iter()
            .find_map(|p| self.lanes[lane(*p)].pop_front())
    }

    pub fn remove(&mut self, task_id: TaskId, priority: Priority) -> bool {
        let lane = &mut self.lanes[lane(priority)];
        match lane.iter().position(|id| *id == task_id) {
            Some(pos) => lane.remove(pos).is_some(),
            None => false,
        }
    }

    pub fn len_of(&self, priority: Priority) -> usize {
        self.lanes[lane(priority)].len()
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    pub fn counts(&self) -> PendingByPriority {
        PendingByPriority {
            urgent: self.len_of(Priority::Urgent),
            high: self.len_of(Priority::High),
            medium: self.len_of(Priority::Medium),
            low: self.len_of(Priority::Low),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn id() -> TaskId {
        TaskId::from_ulid(Ulid::new())
    }

    #[test]
    fn pops_most_urgent_first_then_fifo() {
        let mut b = PriorityBuckets::new();
        let (a, bb, c, d) = (id(), id(), id(), id());
        b.push_back(a, Priority::Low);
        b.push_back(bb, Priority::Urgent);
        b.push_back(c, Priority::Medium);
        b.push_back(d, Priority::Medium);

        assert_eq!(b.pop_next(), Some(bb));
        assert_eq!(b.pop_next(), Some(c));
        assert_eq!(b.pop_next(), Some(d));
        assert_eq!(b.pop_next(), Some(a));
        assert_eq!(b.pop_next(), None);
    }

    #[test]
    fn remove_only_touches_the_given_lane() {
        let mut b = PriorityBuckets::new();
        let a = id();
        b.push_back(a, Priority::High);

        assert!(!b.remove(a, Priority::Low));
        assert!(b.remove(a, Priority::High));
        assert!(b.is_empty());
    }

    #[test]
    fn counts_per_lane() {
        let mut b = PriorityBuckets::new();
        b.push_back(id(), Priority::High);
        b.push_back(id(), Priority::High);
        b.push_back(id(), Priority::Low);

        let counts = b.counts();
        assert_eq!(counts.high, 2);
        assert_eq!(counts.low, 1);
        assert_eq!(counts.urgent + counts.medium, 0);
        assert_eq!(b.len(), 3);
    }
}
