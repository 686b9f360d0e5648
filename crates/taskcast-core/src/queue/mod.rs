//! Queue module: task records, priority lanes and the in-memory queue.

mod buckets;
mod memory;
mod record;
mod stats;

pub use buckets::PriorityBuckets;
pub use memory::{FailureOutcome, InMemoryQueue};
pub use record::TaskRecord;
pub use stats::{PendingByPriority, SchedulerStats, StatusBreakdown};
