use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ProgressState, TaskId};

/// Lifecycle of one task's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPhase {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl StreamPhase {
    pub fn is_finished(self) -> bool {
        !matches!(self, StreamPhase::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub task_id: TaskId,
    pub phase: StreamPhase,
    pub total_stages: u32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub buffered_events: usize,
    pub evicted_events: u64,
    pub last_sequence: Option<u64>,
    pub subscriber_count: usize,
    /// Latest snapshot pushed through `publish_progress`.
    pub progress: Option<ProgressState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub total_streams: usize,
    pub active_streams: usize,
    pub finished_streams: usize,
    pub total_subscribers: usize,
    pub buffered_events: usize,
    pub events_published: u64,
    pub pending_cleanups: usize,
}
