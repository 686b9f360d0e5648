//! Task scheduler: submission, status, cancellation and the worker loop.

mod builder;
mod worker;

pub use builder::SchedulerBuilder;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{SchedulerConfig, TaskcastConfig};
use crate::domain::{EventType, Priority, TaskId, TaskType};
use crate::error::Result;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::queue::{InMemoryQueue, SchedulerStats, TaskRecord};
use crate::runtime::HandlerRegistry;
use crate::stream::{StreamManager, StreamPhase};
use crate::typed::TaskPayload;

/// A task submission.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub priority: Priority,
    /// `None` uses `SchedulerConfig::default_max_retries`.
    pub max_retries: Option<u32>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<TaskType>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority: Priority::default(),
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Worker group handle.
/// - `shutdown_tx` に true を送るとループが止まる（実行中の handler は止めない）
struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    fn is_running(&self) -> bool {
        !self.join.is_finished() && !*self.shutdown_tx.borrow()
    }
}

pub(crate) struct SchedulerInner {
    pub(crate) config: SchedulerConfig,
    pub(crate) eta_threshold_pct: f64,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) queue: InMemoryQueue,
    pub(crate) streams: StreamManager,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    worker: Mutex<Option<WorkerHandle>>,
}

/// Background task scheduler.
///
/// Cheap to clone; every clone drives the same queue, worker loop and
/// [`StreamManager`].
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Scheduler with the system clock and ULID ids.
    pub fn new(registry: HandlerRegistry, config: TaskcastConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));
        Self::from_parts(registry, config, clock, ids)
    }

    pub(crate) fn from_parts(
        registry: HandlerRegistry,
        config: TaskcastConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        config.validate()?;
        let streams =
            StreamManager::with_ports(config.streams.clone(), Arc::clone(&clock), Arc::clone(&ids));
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                eta_threshold_pct: config.streams.eta_threshold_pct,
                config: config.scheduler,
                registry: Arc::new(registry),
                queue: InMemoryQueue::new(),
                streams,
                clock,
                ids,
                worker: Mutex::new(None),
            }),
        })
    }

    /// Submit a task with the default retry budget.
    pub async fn enqueue(
        &self,
        task_type: impl Into<TaskType>,
        payload: serde_json::Value,
        priority: Priority,
    ) -> TaskId {
        self.submit(TaskRequest::new(task_type, payload).with_priority(priority))
            .await
    }

    /// Submit a typed payload under `T::TYPE`.
    pub async fn enqueue_typed<T: TaskPayload>(&self, payload: &T, priority: Priority) -> Result<TaskId> {
        let payload = serde_json::to_value(payload)?;
        Ok(self.enqueue(T::TYPE, payload, priority).await)
    }

    /// Submit a task. Always succeeds; the queue is unbounded.
    ///
    /// Opens the task's event stream before the task becomes visible to the
    /// worker, so subscribers never miss its first events.
    pub async fn submit(&self, request: TaskRequest) -> TaskId {
        let inner = &self.inner;
        let task_id = inner.ids.generate_task_id();
        let max_retries = request
            .max_retries
            .unwrap_or(inner.config.default_max_retries);
        let total_stages = inner
            .registry
            .get(&request.task_type)
            .map_or(1, |handler| handler.total_stages());

        inner.streams.start_stream(task_id, total_stages);
        info!(
            %task_id,
            task_type = %request.task_type,
            priority = %request.priority,
            max_retries,
            "task enqueued"
        );

        let record = TaskRecord::new(
            task_id,
            request.task_type,
            request.priority,
            request.payload,
            max_retries,
            inner.clock.now(),
        );
        inner.queue.push(record).await;

        if inner.config.autostart {
            self.start();
        }
        task_id
    }

    pub async fn get_status(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.inner.queue.get(task_id).await
    }

    /// Cancel a PENDING task.
    ///
    /// Returns `false` for tasks that are already processing, finished or
    /// unknown; a running handler is never interrupted.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        let inner = &self.inner;
        let Some(record) = inner.queue.cancel(task_id, inner.clock.now()).await else {
            debug!(%task_id, "cancel rejected");
            return false;
        };

        info!(%task_id, task_type = %record.task_type, "task cancelled");
        worker::publish(
            inner,
            task_id,
            EventType::Info,
            json!({ "message": "task cancelled", "status": record.status }),
        );
        worker::close_stream(inner, task_id, StreamPhase::Cancelled);
        inner.queue.notify_finished();
        true
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        let worker_active = self.is_worker_active();
        self.inner
            .queue
            .stats(worker_active, self.inner.config.max_concurrent)
            .await
    }

    /// Start the worker loop if it is not already running.
    ///
    /// Called by `submit` when `autostart` is on. Needs a tokio runtime.
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock();
        if worker.as_ref().is_some_and(WorkerHandle::is_running) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime; worker loop not started");
            return;
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = handle.spawn(worker::worker_loop(Arc::downgrade(&self.inner), shutdown_rx));
        *worker = Some(WorkerHandle { shutdown_tx, join });
    }

    /// Stop dispatching and abort pending stream cleanups.
    ///
    /// In-flight handlers keep running to completion.
    pub async fn shutdown(&self) {
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            // ignore send error: the loop may already be gone
            let _ = worker.shutdown_tx.send(true);
            if let Err(err) = worker.join.await {
                warn!(error = %err, "worker loop ended abnormally");
            }
        }
        self.inner.streams.shutdown();
        info!("scheduler shut down");
    }

    /// Resolve once the task is COMPLETED, FAILED or CANCELLED.
    pub async fn wait_for(&self, task_id: TaskId) -> Result<TaskRecord> {
        self.inner.queue.wait_terminal(task_id).await
    }

    /// Drop terminal task records that finished more than `older_than` ago.
    pub async fn purge_finished(&self, older_than: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let Some(cutoff) = self.inner.clock.now().checked_sub_signed(age) else {
            return 0;
        };
        let purged = self.inner.queue.purge_terminal(cutoff).await;
        if purged > 0 {
            info!(purged, "finished tasks purged");
        }
        purged
    }

    pub fn streams(&self) -> &StreamManager {
        &self.inner.streams
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    fn is_worker_active(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(WorkerHandle::is_running)
    }
}
