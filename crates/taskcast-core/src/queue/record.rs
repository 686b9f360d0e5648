//! Task record: metadata + payload + lifecycle timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Priority, TaskEvent, TaskId, TaskStatus, TaskType, Transition, transition};
use crate::error::Result;

/// A submitted task.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - Priority buckets hold TaskId only.
/// - All state transitions go through [`TaskRecord::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub status: TaskStatus,

    /// Number of retries already granted (0 on the first attempt).
    pub retry_count: u32,
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
    /// Start of the most recent attempt.
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Set only once the task is FAILED.
    pub error_message: Option<String>,
    /// Value returned by the handler on success.
    pub result: Option<serde_json::Value>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        priority: Priority,
        payload: serde_json::Value,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            priority,
            payload,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries,
            created_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            result: None,
        }
    }

    /// The record as it would look after `event`; `self` is left untouched.
    pub fn preview(&self, event: TaskEvent, now: DateTime<Utc>) -> Result<TaskRecord> {
        let mut next = self.clone();
        next.apply(event, now)?;
        Ok(next)
    }

    /// Apply `event`, updating status, counters and timestamps.
    ///
    /// A retry sends the task back to PENDING on its (possibly demoted) lane.
    pub fn apply(&mut self, event: TaskEvent, now: DateTime<Utc>) -> Result<Transition> {
        let t = transition(self.status, event, self.retry_count, self.max_retries)?;
        self.status = t.next;
        self.retry_count = t.retry_count;

        match t.next {
            TaskStatus::Processing => self.started_at = Some(now),
            TaskStatus::Pending => self.priority = self.priority.on_retry(),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(now)
            }
        }
        Ok(t)
    }

    pub fn mark_succeeded(&mut self, result: serde_json::Value, now: DateTime<Utc>) -> Result<()> {
        self.apply(TaskEvent::Succeeded, now)?;
        self.result = Some(result);
        Ok(())
    }

    /// Record a failed attempt. Returns whether the task goes back to its bucket.
    pub fn mark_failed(&mut self, error: String, retryable: bool, now: DateTime<Utc>) -> Result<bool> {
        let t = self.apply(TaskEvent::Failed { retryable }, now)?;
        if !t.is_retry() {
            self.error_message = Some(error);
        }
        Ok(t.is_retry())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
