//! In-memory queue implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use super::{PriorityBuckets, SchedulerStats, StatusBreakdown, TaskRecord};
use crate::domain::{TaskEvent, TaskId};
use crate::error::{Result, TaskcastError};

/// What happened to a failed attempt.
#[derive(Debug, Clone)]
pub enum FailureOutcome {
    /// Back in its bucket (already demoted if it was URGENT).
    Retried(TaskRecord),
    /// Permanently FAILED.
    Failed(TaskRecord),
}

impl FailureOutcome {
    pub fn record(&self) -> &TaskRecord {
        match self {
            FailureOutcome::Retried(r) | FailureOutcome::Failed(r) => r,
        }
    }

    pub fn will_retry(&self) -> bool {
        matches!(self, FailureOutcome::Retried(_))
    }
}

/// In-memory queue state.
#[derive(Default)]
struct QueueState {
    /// All task records (single source of truth).
    records: HashMap<TaskId, TaskRecord>,

    /// Pending lanes (TaskIds only).
    buckets: PriorityBuckets,

    /// Tasks handed to a runner and not yet reported back.
    processing: HashSet<TaskId>,
}

impl QueueState {
    fn record_mut(&mut self, task_id: TaskId) -> Result<&mut TaskRecord> {
        self.records
            .get_mut(&task_id)
            .ok_or(TaskcastError::TaskNotFound(task_id))
    }
}

/// In-memory, unbounded priority queue.
///
/// - `work` wakes the worker loop (new task, freed slot, requeued retry).
/// - `finished` wakes `wait_terminal` callers; it is fired by the scheduler
///   once the task's final events are out.
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    work: Arc<Notify>,
    finished: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            work: Arc::new(Notify::new()),
            finished: Notify::new(),
        }
    }

    /// Add a PENDING task at the tail of its bucket.
    pub async fn push(&self, record: TaskRecord) {
        {
            let mut state = self.state.lock().await;
            state.buckets.push_back(record.id, record.priority);
            state.records.insert(record.id, record);
        }
        self.work.notify_one();
    }

    /// Move up to `max_concurrent - processing` tasks into PROCESSING,
    /// URGENT -> HIGH -> MEDIUM -> LOW, FIFO within a lane.
    pub async fn take_ready(&self, max_concurrent: usize, now: DateTime<Utc>) -> Vec<TaskRecord> {
        let mut state = self.state.lock().await;
        let mut batch = Vec::new();

        while state.processing.len() < max_concurrent {
            let Some(task_id) = state.buckets.pop_next() else {
                break;
            };
            let Some(record) = state.records.get_mut(&task_id) else {
                continue;
            };
            if record.apply(TaskEvent::Dispatched, now).is_err() {
                continue;
            }
            batch.push(record.clone());
            state.processing.insert(task_id);
        }
        batch
    }

    pub async fn complete(
        &self,
        task_id: TaskId,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord> {
        let record = {
            let mut state = self.state.lock().await;
            state.processing.remove(&task_id);
            let record = state.record_mut(task_id)?;
            record.mark_succeeded(result, now)?;
            record.clone()
        };
        self.work.notify_one();
        Ok(record)
    }

    /// Record a failed attempt; a retryable one goes back to its bucket.
    pub async fn fail(
        &self,
        task_id: TaskId,
        error: String,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let outcome = {
            let mut state = self.state.lock().await;
            state.processing.remove(&task_id);
            let record = state.record_mut(task_id)?;
            let requeue = record.mark_failed(error, retryable, now)?;
            let record = record.clone();
            if requeue {
                state.buckets.push_back(task_id, record.priority);
                FailureOutcome::Retried(record)
            } else {
                FailureOutcome::Failed(record)
            }
        };
        self.work.notify_one();
        Ok(outcome)
    }

    /// Cancel a PENDING task. `None` for PROCESSING, terminal or unknown tasks.
    pub async fn cancel(&self, task_id: TaskId, now: DateTime<Utc>) -> Option<TaskRecord> {
        let mut state = self.state.lock().await;
        let record = state.records.get_mut(&task_id)?;
        record.apply(TaskEvent::CancelRequested, now).ok()?;
        let record = record.clone();
        state.buckets.remove(task_id, record.priority);
        Some(record)
    }

    pub async fn get(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.state.lock().await.records.get(&task_id).cloned()
    }

    pub async fn processing_count(&self) -> usize {
        self.state.lock().await.processing.len()
    }

    pub async fn stats(&self, worker_active: bool, max_concurrent: usize) -> SchedulerStats {
        let state = self.state.lock().await;
        let mut status_breakdown = StatusBreakdown::default();
        for record in state.records.values() {
            status_breakdown.count(record.status);
        }
        SchedulerStats {
            total_tasks: state.records.len(),
            pending_by_priority: state.buckets.counts(),
            processing_count: state.processing.len(),
            status_breakdown,
            worker_active,
            max_concurrent,
        }
    }

    /// Drop terminal records completed before `cutoff`.
    pub async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state
            .records
            .retain(|_, r| !(r.is_terminal() && r.completed_at.is_some_and(|t| t < cutoff)));
        before - state.records.len()
    }

    /// Resolve once `task_id` is terminal and [`notify_finished`](Self::notify_finished)
    /// has been called for it.
    pub async fn wait_terminal(&self, task_id: TaskId) -> Result<TaskRecord> {
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.get(task_id).await {
                Some(record) if record.is_terminal() => return Ok(record),
                Some(_) => {}
                None => return Err(TaskcastError::TaskNotFound(task_id)),
            }
            notified.await;
        }
    }

    pub(crate) fn notify_finished(&self) {
        self.finished.notify_waiters();
    }

    /// Handle the worker loop waits on.
    pub(crate) fn work_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.work)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}
