//! Worker loop and per-attempt execution.
//!
//! One loop per scheduler; each dispatched attempt runs as its own tokio task.
//! Nothing here holds the queue lock across a handler `.await`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use serde_json::json;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::SchedulerInner;
use crate::domain::{EventType, TaskEvent, TaskId, TaskStatus};
use crate::error::TaskcastError;
use crate::queue::{FailureOutcome, TaskRecord};
use crate::runtime::TaskContext;
use crate::stream::StreamPhase;
use crate::tracker::ProgressTracker;

/// Dispatch until shut down.
///
/// Holds the scheduler through a `Weak`, so dropping every handle also stops
/// the loop.
pub(crate) async fn worker_loop(
    scheduler: Weak<SchedulerInner>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("worker loop started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let Some(inner) = scheduler.upgrade() else {
            break;
        };

        let dispatched = dispatch_ready(&inner).await;
        let work = inner.queue.work_signal();
        let poll_interval = inner.config.poll_interval();
        drop(inner);

        if dispatched > 0 {
            continue;
        }

        // 空きスロットか新しい task が来るまで待つ。poll は取りこぼし対策
        tokio::select! {
            _ = work.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!("worker loop stopped");
}

async fn dispatch_ready(inner: &Arc<SchedulerInner>) -> usize {
    let batch = inner
        .queue
        .take_ready(inner.config.max_concurrent, inner.clock.now())
        .await;
    let dispatched = batch.len();
    for record in batch {
        tokio::spawn(run_task(Arc::clone(inner), record));
    }
    dispatched
}

async fn run_task(inner: Arc<SchedulerInner>, record: TaskRecord) {
    let span = info_span!(
        "task",
        task_id = %record.id,
        task_type = %record.task_type,
        attempt = record.retry_count + 1,
    );
    execute(&inner, record).instrument(span).await
}

async fn execute(inner: &SchedulerInner, record: TaskRecord) {
    let task_id = record.id;
    let attempt = record.retry_count;
    info!(priority = %record.priority, "task dispatched");
    publish(
        inner,
        task_id,
        EventType::Info,
        json!({
            "message": "processing started",
            "attempt": attempt + 1,
            "priority": record.priority,
        }),
    );

    let handler = match inner.registry.resolve(&record.task_type) {
        Ok(handler) => handler,
        Err(err) => return on_failure(inner, task_id, err).await,
    };

    let mut tracker = ProgressTracker::new(task_id, handler.total_stages(), Arc::clone(&inner.clock))
        .with_streams(inner.streams.clone())
        .with_eta_threshold(inner.eta_threshold_pct);
    let ctx = TaskContext {
        task_id,
        task_type: record.task_type,
        payload: record.payload,
        attempt,
    };

    let result = match AssertUnwindSafe(handler.handle(&ctx, &mut tracker))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(TaskcastError::Panicked(panic_message(&*panic))),
    };

    match result {
        Ok(value) => {
            tracker.finish();
            on_success(inner, task_id, value).await
        }
        Err(err) => on_failure(inner, task_id, err).await,
    }
}

async fn on_success(inner: &SchedulerInner, task_id: TaskId, value: serde_json::Value) {
    let now = inner.clock.now();
    match inner.queue.complete(task_id, value.clone(), now).await {
        Ok(record) => {
            let duration_ms = record.started_at.map(|s| (now - s).num_milliseconds());
            info!(retry_count = record.retry_count, ?duration_ms, "task completed");
            publish(
                inner,
                task_id,
                EventType::AnalysisComplete,
                json!({
                    "status": record.status,
                    "result": value,
                    "retry_count": record.retry_count,
                    "duration_ms": duration_ms,
                }),
            );
            close_stream(inner, task_id, StreamPhase::Completed);
        }
        Err(err) => error!(error = %err, "could not record task completion"),
    }
    inner.queue.notify_finished();
}

async fn on_failure(inner: &SchedulerInner, task_id: TaskId, err: TaskcastError) {
    let retryable = err.is_retryable();
    let message = err.to_string();
    let now = inner.clock.now();

    // ERROR_OCCURRED は requeue より先に出す。後だと次の attempt の INFO が先に届きうる
    let Some(current) = inner.queue.get(task_id).await else {
        error!("failed task vanished from the queue");
        return;
    };
    match current.preview(TaskEvent::Failed { retryable }, now) {
        Ok(next) => publish(
            inner,
            task_id,
            EventType::ErrorOccurred,
            json!({
                "error": message,
                "retry_count": next.retry_count,
                "max_retries": next.max_retries,
                "will_retry": next.status == TaskStatus::Pending,
                "priority": next.priority,
            }),
        ),
        Err(e) => debug!(error = %e, "failure preview rejected"),
    }

    match inner.queue.fail(task_id, message.clone(), retryable, now).await {
        Ok(FailureOutcome::Retried(record)) => {
            warn!(
                error = %message,
                retry_count = record.retry_count,
                max_retries = record.max_retries,
                priority = %record.priority,
                "attempt failed; task requeued"
            );
        }
        Ok(FailureOutcome::Failed(record)) => {
            error!(
                error = %message,
                retry_count = record.retry_count,
                retryable,
                "task failed"
            );
            close_stream(inner, task_id, StreamPhase::Failed);
            inner.queue.notify_finished();
        }
        Err(e) => error!(error = %e, "could not record task failure"),
    }
}

pub(crate) fn publish(
    inner: &SchedulerInner,
    task_id: TaskId,
    event_type: EventType,
    data: serde_json::Value,
) {
    if let Err(err) = inner.streams.publish(task_id, event_type, data) {
        debug!(%task_id, error = %err, ?event_type, "event dropped");
    }
}

pub(crate) fn close_stream(inner: &SchedulerInner, task_id: TaskId, phase: StreamPhase) {
    if inner.streams.finish_stream(task_id, phase) {
        inner.streams.schedule_cleanup(task_id, None);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
