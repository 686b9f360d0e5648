//! Delayed stream cleanup.
//!
//! Holds task ids and timer handles only; the timer task reaches the manager
//! through a `Weak`, so a dropped manager simply makes pending cleanups no-ops.

use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{StreamInner, StreamManager};
use crate::domain::TaskId;

#[derive(Default)]
pub(crate) struct CleanupScheduler {
    pending: Mutex<HashMap<TaskId, JoinHandle<()>>>,
}

impl CleanupScheduler {
    /// Schedule cleanup of `task_id` after `delay`, replacing any earlier timer.
    pub(crate) fn schedule(&self, task_id: TaskId, delay: Duration, manager: Weak<StreamInner>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(%task_id, "no tokio runtime; stream cleanup not scheduled");
            return;
        };

        let join = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = manager.upgrade() {
                inner.cleanup.forget(task_id);
                StreamManager { inner }.cleanup_stream(task_id);
            }
        });

        if let Some(previous) = self.pending.lock().insert(task_id, join) {
            previous.abort();
        }
        debug!(%task_id, delay_secs = delay.as_secs_f64(), "stream cleanup scheduled");
    }

    pub(crate) fn cancel(&self, task_id: TaskId) -> bool {
        match self.pending.lock().remove(&task_id) {
            Some(join) => {
                join.abort();
                true
            }
            None => false,
        }
    }

    /// Drop the bookkeeping for a timer that already fired.
    fn forget(&self, task_id: TaskId) {
        self.pending.lock().remove(&task_id);
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn abort_all(&self) {
        for (_, join) in self.pending.lock().drain() {
            join.abort();
        }
    }
}
