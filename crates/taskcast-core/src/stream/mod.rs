//! Event broadcaster: per-task replay buffers + live fan-out.
//!
//! ```text
//! publish(task, type, data)
//!     │  (registry lock: sequence allocation, append, channel send)
//!     ├──► ReplayBuffer (bounded, oldest evicted)
//!     ├──► subscription 1..N (unbounded channels, closed ones pruned)
//!     └──► outbox ──(after unlock)──► listener 1..N (failures isolated)
//! ```
//!
//! Design:
//! - One registry lock covers every stream plus the global sequence counter,
//!   so sequence numbers are strictly increasing system-wide and every
//!   subscriber of a task sees them in order.
//! - `subscribe` snapshots the buffer and registers the live channel under
//!   the same lock: no gap and no duplicate at the replay/live boundary.
//! - Listener batches enter the outbox in sequence order and are drained by
//!   one publisher at a time outside the registry lock, so a listener may
//!   publish. Its event is delivered after the current batch.
//! - Nothing here awaits while holding the lock.

mod buffer;
mod cleanup;
mod status;
mod subscription;

pub use buffer::ReplayBuffer;
pub use status::{StreamPhase, StreamStats, StreamStatus};
pub use subscription::{StreamListener, Subscription};

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use self::cleanup::CleanupScheduler;
use crate::config::StreamConfig;
use crate::domain::{EventType, ProgressState, StreamEvent, SubscriberId, TaskId};
use crate::error::{Result, TaskcastError};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

struct TaskStream {
    buffer: ReplayBuffer,
    listeners: Vec<(SubscriberId, Arc<dyn StreamListener>)>,
    channels: Vec<(SubscriberId, mpsc::UnboundedSender<StreamEvent>)>,
    phase: StreamPhase,
    total_stages: u32,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    progress: Option<ProgressState>,
}

impl TaskStream {
    fn new(capacity: usize, total_stages: u32, now: DateTime<Utc>) -> Self {
        Self {
            buffer: ReplayBuffer::new(capacity),
            listeners: Vec::new(),
            channels: Vec::new(),
            phase: StreamPhase::Active,
            total_stages,
            created_at: now,
            finished_at: None,
            progress: None,
        }
    }

    fn subscriber_count(&self) -> usize {
        self.listeners.len() + self.channels.len()
    }

    /// Append and send to subscriptions. Caller holds the registry lock.
    ///
    /// Listeners are returned as a batch for the caller to queue.
    fn deliver(&mut self, event: StreamEvent) -> Option<ListenerBatch> {
        self.buffer.push(event.clone());

        self.channels.retain(|(id, tx)| {
            let open = tx.send(event.clone()).is_ok();
            if !open {
                debug!(task_id = %event.task_id, subscriber = %id, "subscription dropped");
            }
            open
        });

        if self.listeners.is_empty() {
            None
        } else {
            Some(ListenerBatch {
                event,
                listeners: self.listeners.clone(),
            })
        }
    }

    fn status(&self, task_id: TaskId) -> StreamStatus {
        StreamStatus {
            task_id,
            phase: self.phase,
            total_stages: self.total_stages,
            created_at: self.created_at,
            finished_at: self.finished_at,
            buffered_events: self.buffer.len(),
            evicted_events: self.buffer.evicted(),
            last_sequence: self.buffer.last_sequence(),
            subscriber_count: self.subscriber_count(),
            progress: self.progress.clone(),
        }
    }
}

/// One event plus the listeners registered when it was published.
struct ListenerBatch {
    event: StreamEvent,
    listeners: Vec<(SubscriberId, Arc<dyn StreamListener>)>,
}

impl ListenerBatch {
    fn run(self) {
        let event = &self.event;
        for (id, listener) in &self.listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    task_id = %event.task_id,
                    subscriber = %id,
                    listener = listener.name(),
                    error = %e,
                    "stream listener failed"
                ),
                Err(_) => warn!(
                    task_id = %event.task_id,
                    subscriber = %id,
                    listener = listener.name(),
                    "stream listener panicked"
                ),
            }
        }
    }
}

#[derive(Default)]
struct Registry {
    streams: HashMap<TaskId, TaskStream>,
    next_sequence: u64,
    published: u64,
    outbox: VecDeque<ListenerBatch>,
}

impl Registry {
    fn allocate_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn emit(
        &mut self,
        task_id: TaskId,
        event_type: EventType,
        data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<StreamEvent> {
        let Some(stream) = self.streams.get_mut(&task_id) else {
            return Err(TaskcastError::StreamNotFound(task_id));
        };
        self.next_sequence += 1;
        self.published += 1;

        let event = StreamEvent {
            event_type,
            task_id,
            timestamp: now,
            sequence_number: self.next_sequence,
            data,
        };
        if let Some(batch) = stream.deliver(event.clone()) {
            self.outbox.push_back(batch);
        }
        Ok(event)
    }
}

pub(crate) struct StreamInner {
    config: StreamConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    registry: Mutex<Registry>,
    /// Held by the publisher currently draining the outbox.
    dispatching: Mutex<()>,
    cleanup: CleanupScheduler,
}

/// Cloneable handle to the broadcaster; clones share all state.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<StreamInner>,
}

impl StreamManager {
    pub fn new(config: StreamConfig) -> Self {
        Self::with_ports(
            config,
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    pub fn with_ports(
        config: StreamConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                config,
                clock,
                ids,
                registry: Mutex::new(Registry::default()),
                dispatching: Mutex::new(()),
                cleanup: CleanupScheduler::default(),
            }),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Open (or re-activate) the stream of `task_id` and emit an INFO event.
    ///
    /// Re-opening keeps the buffer and every subscriber.
    pub fn start_stream(&self, task_id: TaskId, total_stages: u32) -> StreamEvent {
        let now = self.inner.clock.now();
        let cap = self.inner.config.history_cap;
        let mut registry = self.inner.registry.lock();

        let sequence_number = registry.allocate_sequence();
        registry.published += 1;

        let stream = registry
            .streams
            .entry(task_id)
            .or_insert_with(|| TaskStream::new(cap, total_stages, now));
        stream.total_stages = total_stages.max(1);
        stream.phase = StreamPhase::Active;
        stream.finished_at = None;

        let event = StreamEvent {
            event_type: EventType::Info,
            task_id,
            timestamp: now,
            sequence_number,
            data: json!({ "message": "stream started", "total_stages": stream.total_stages }),
        };
        let batch = stream.deliver(event.clone());
        if let Some(batch) = batch {
            registry.outbox.push_back(batch);
        }
        drop(registry);
        debug!(%task_id, total_stages, "stream started");
        self.run_listeners();
        event
    }

    /// Publish one event for `task_id`.
    pub fn publish(
        &self,
        task_id: TaskId,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<StreamEvent> {
        let now = self.inner.clock.now();
        let event = self.inner.registry.lock().emit(task_id, event_type, data, now)?;
        self.run_listeners();
        Ok(event)
    }

    /// Record `progress` as the latest snapshot and publish PROGRESS_UPDATE.
    pub fn publish_progress(&self, task_id: TaskId, progress: &ProgressState) -> Result<StreamEvent> {
        let data = serde_json::to_value(progress)?;
        let now = self.inner.clock.now();
        let mut registry = self.inner.registry.lock();

        let stream = registry
            .streams
            .get_mut(&task_id)
            .ok_or(TaskcastError::StreamNotFound(task_id))?;
        stream.progress = Some(progress.clone());

        let event = registry.emit(task_id, EventType::ProgressUpdate, data, now)?;
        drop(registry);
        self.run_listeners();
        Ok(event)
    }

    /// Drain the outbox unless another call is already draining it.
    ///
    /// A listener that publishes lands here with `dispatching` held by its
    /// own caller; its batch is queued and run by that caller's loop.
    fn run_listeners(&self) {
        loop {
            let Some(guard) = self.inner.dispatching.try_lock() else {
                return;
            };
            while let Some(batch) = self.next_batch() {
                batch.run();
            }
            drop(guard);
            // a batch queued between the last pop and the unlock has no drainer yet
            if self.inner.registry.lock().outbox.is_empty() {
                return;
            }
        }
    }

    fn next_batch(&self) -> Option<ListenerBatch> {
        self.inner.registry.lock().outbox.pop_front()
    }

    /// Mark the stream finished and close live subscriptions.
    ///
    /// Subscriptions still drain whatever was sent before this call.
    pub fn finish_stream(&self, task_id: TaskId, phase: StreamPhase) -> bool {
        let now = self.inner.clock.now();
        let mut registry = self.inner.registry.lock();
        let Some(stream) = registry.streams.get_mut(&task_id) else {
            return false;
        };
        stream.phase = phase;
        stream.finished_at = Some(now);
        stream.channels.clear();
        debug!(%task_id, ?phase, "stream finished");
        true
    }

    /// Replay the buffer, then follow live events.
    pub fn subscribe(&self, task_id: TaskId) -> Result<Subscription> {
        let id = self.inner.ids.generate_subscriber_id();
        let mut registry = self.inner.registry.lock();
        let stream = registry
            .streams
            .get_mut(&task_id)
            .ok_or(TaskcastError::StreamNotFound(task_id))?;

        let replay = stream.buffer.snapshot();
        let live = if stream.phase.is_finished() {
            None
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            stream.channels.push((id, tx));
            Some(rx)
        };
        debug!(%task_id, subscriber = %id, replay = replay.len(), "subscribed");

        Ok(Subscription::new(
            id,
            task_id,
            replay,
            live,
            self.inner.config.keepalive(),
            self.clone(),
        ))
    }

    /// Register a callback for future events of `task_id`.
    pub fn add_listener(
        &self,
        task_id: TaskId,
        listener: Arc<dyn StreamListener>,
    ) -> Result<SubscriberId> {
        let id = self.inner.ids.generate_subscriber_id();
        let mut registry = self.inner.registry.lock();
        let stream = registry
            .streams
            .get_mut(&task_id)
            .ok_or(TaskcastError::StreamNotFound(task_id))?;
        stream.listeners.push((id, listener));
        Ok(id)
    }

    pub fn remove_listener(&self, task_id: TaskId, id: SubscriberId) -> bool {
        let mut registry = self.inner.registry.lock();
        let Some(stream) = registry.streams.get_mut(&task_id) else {
            return false;
        };
        let before = stream.listeners.len();
        stream.listeners.retain(|(lid, _)| *lid != id);
        stream.listeners.len() != before
    }

    /// Called by an idle [`Subscription`]: hand back an event that raced in,
    /// or mint a keepalive. Holding the lock here means no event can be
    /// published between the channel check and the sequence allocation.
    fn idle_tick(&self, task_id: TaskId, rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
        let mut registry = self.inner.registry.lock();
        if let Ok(event) = rx.try_recv() {
            return event;
        }
        let sequence = registry.allocate_sequence();
        StreamEvent::keepalive(task_id, sequence, self.inner.clock.now())
    }

    pub fn get_status(&self, task_id: TaskId) -> Option<StreamStatus> {
        let registry = self.inner.registry.lock();
        registry.streams.get(&task_id).map(|s| s.status(task_id))
    }

    /// The most recent `limit` events (all when `None`), oldest first.
    pub fn get_history(&self, task_id: TaskId, limit: Option<usize>) -> Option<Vec<StreamEvent>> {
        let registry = self.inner.registry.lock();
        registry.streams.get(&task_id).map(|s| s.buffer.recent(limit))
    }

    pub fn get_system_stats(&self) -> StreamStats {
        let registry = self.inner.registry.lock();
        let mut stats = StreamStats {
            total_streams: registry.streams.len(),
            events_published: registry.published,
            pending_cleanups: self.inner.cleanup.pending_count(),
            ..StreamStats::default()
        };
        for stream in registry.streams.values() {
            if stream.phase.is_finished() {
                stats.finished_streams += 1;
            } else {
                stats.active_streams += 1;
            }
            stats.total_subscribers += stream.subscriber_count();
            stats.buffered_events += stream.buffer.len();
        }
        stats
    }

    /// Clean up `task_id` after `delay` (the configured grace period when `None`).
    pub fn schedule_cleanup(&self, task_id: TaskId, delay: Option<Duration>) {
        let delay = delay.unwrap_or_else(|| self.inner.config.cleanup_grace());
        self.inner
            .cleanup
            .schedule(task_id, delay, Arc::downgrade(&self.inner));
    }

    pub fn cancel_cleanup(&self, task_id: TaskId) -> bool {
        self.inner.cleanup.cancel(task_id)
    }

    /// Drop subscribers of `task_id`; drop its history too unless configured
    /// to retain it. Open subscriptions end once they drain.
    pub fn cleanup_stream(&self, task_id: TaskId) -> bool {
        let mut registry = self.inner.registry.lock();
        let removed = if self.inner.config.retain_history_on_cleanup {
            match registry.streams.get_mut(&task_id) {
                Some(stream) => {
                    stream.listeners.clear();
                    stream.channels.clear();
                    stream.progress = None;
                    true
                }
                None => false,
            }
        } else {
            registry.streams.remove(&task_id).is_some()
        };
        if removed {
            debug!(%task_id, "stream cleaned up");
        }
        removed
    }

    /// Clean up every stream that finished more than `older_than` ago.
    pub fn cleanup_old_streams(&self, older_than: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(older_than) {
            Ok(d) => self.inner.clock.now() - d,
            Err(_) => return 0,
        };
        let expired: Vec<TaskId> = {
            let registry = self.inner.registry.lock();
            registry
                .streams
                .iter()
                .filter(|(_, s)| s.finished_at.is_some_and(|t| t < cutoff))
                .map(|(id, _)| *id)
                .collect()
        };

        let mut cleaned = 0;
        for task_id in expired {
            self.inner.cleanup.cancel(task_id);
            if self.cleanup_stream(task_id) {
                cleaned += 1;
            }
        }
        cleaned
    }

    /// Abort every pending cleanup timer.
    pub fn shutdown(&self) {
        self.inner.cleanup.abort_all();
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ulid::Ulid;

    fn task() -> TaskId {
        TaskId::from_ulid(Ulid::new())
    }

    fn manager_with_cap(history_cap: usize) -> StreamManager {
        StreamManager::new(StreamConfig {
            history_cap,
            ..StreamConfig::default()
        })
    }

    fn sequences(events: &[StreamEvent]) -> Vec<u64> {
        events.iter().map(|e| e.sequence_number).collect()
    }

    #[test]
    fn publish_to_unknown_stream_fails() {
        let manager = StreamManager::default();
        let err = manager
            .publish(task(), EventType::Info, json!({}))
            .unwrap_err();
        assert!(matches!(err, TaskcastError::StreamNotFound(_)));
    }

    #[test]
    fn sequences_are_global_and_strictly_increasing() {
        let manager = StreamManager::default();
        let (a, b) = (task(), task());
        let mut seen = vec![manager.start_stream(a, 2).sequence_number];
        seen.push(manager.start_stream(b, 1).sequence_number);

        for i in 0..10 {
            let id = if i % 2 == 0 { a } else { b };
            seen.push(manager.publish(id, EventType::Info, json!({ "i": i })).unwrap().sequence_number);
        }

        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn history_is_bounded_and_keeps_the_tail() {
        let manager = manager_with_cap(5);
        let id = task();
        manager.start_stream(id, 1);
        for i in 0..20 {
            manager.publish(id, EventType::Info, json!({ "i": i })).unwrap();
        }

        let history = manager.get_history(id, None).unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history.last().unwrap().data["i"], 19);

        let status = manager.get_status(id).unwrap();
        assert_eq!(status.evicted_events, 16);

        let tail = manager.get_history(id, Some(2)).unwrap();
        assert_eq!(tail[0].data["i"], 18);
        assert_eq!(tail[1].data["i"], 19);
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let manager = StreamManager::default();
        let id = task();
        manager.start_stream(id, 1);

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);

        manager
            .add_listener(id, Arc::new(|_: &StreamEvent| -> Result<()> {
                Err(TaskcastError::Listener("nope".into()))
            }))
            .unwrap();
        manager
            .add_listener(id, Arc::new(|_: &StreamEvent| -> Result<()> { panic!("listener bug") }))
            .unwrap();
        manager
            .add_listener(
                id,
                Arc::new(move |_: &StreamEvent| -> Result<()> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        manager.publish(id, EventType::Info, json!({ "n": 1 })).unwrap();
        manager.publish(id, EventType::Info, json!({ "n": 2 })).unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        // buffer intact: start + 2 published
        assert_eq!(manager.get_history(id, None).unwrap().len(), 3);
    }

    #[test]
    fn listener_can_publish_follow_up_events() {
        let manager = StreamManager::default();
        let id = task();
        manager.start_stream(id, 1);

        let echo = manager.clone();
        manager
            .add_listener(
                id,
                Arc::new(move |event: &StreamEvent| -> Result<()> {
                    if event.data["n"] == 1 {
                        echo.publish(id, EventType::Warning, json!({ "echo": 1 }))?;
                    }
                    Ok(())
                }),
            )
            .unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager
            .add_listener(
                id,
                Arc::new(move |event: &StreamEvent| -> Result<()> {
                    sink.lock().push(event.sequence_number);
                    Ok(())
                }),
            )
            .unwrap();

        let first = manager.publish(id, EventType::Info, json!({ "n": 1 })).unwrap();
        let second = manager.publish(id, EventType::Info, json!({ "n": 2 })).unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen[0], first.sequence_number);
        assert_eq!(seen[2], second.sequence_number);

        let history = manager.get_history(id, None).unwrap();
        assert_eq!(history[2].event_type, EventType::Warning);
        assert_eq!(history[2].data["echo"], 1);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let manager = StreamManager::default();
        let id = task();
        manager.start_stream(id, 1);

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let lid = manager
            .add_listener(
                id,
                Arc::new(move |_: &StreamEvent| -> Result<()> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        manager.publish(id, EventType::Info, json!({})).unwrap();
        assert!(manager.remove_listener(id, lid));
        manager.publish(id, EventType::Info, json!({})).unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert!(!manager.remove_listener(id, lid));
    }

    #[tokio::test]
    async fn late_subscriber_gets_replay_then_live() {
        let manager = StreamManager::default();
        let id = task();
        manager.start_stream(id, 1);
        manager.publish(id, EventType::Info, json!({ "n": 1 })).unwrap();

        let mut sub = manager.subscribe(id).unwrap();
        manager.publish(id, EventType::ProgressUpdate, json!({ "n": 2 })).unwrap();
        manager.publish(id, EventType::AnalysisComplete, json!({ "n": 3 })).unwrap();
        manager.publish(id, EventType::Info, json!({ "after": true })).unwrap();

        let mut events = Vec::new();
        while let Some(event) = sub.recv().await {
            events.push(event);
        }

        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::Info,
                EventType::Info,
                EventType::ProgressUpdate,
                EventType::AnalysisComplete
            ]
        );
        assert!(sequences(&events).windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn subscriber_past_the_cap_starts_at_oldest_buffered() {
        let manager = manager_with_cap(3);
        let id = task();
        manager.start_stream(id, 1);
        for i in 0..10 {
            manager.publish(id, EventType::Info, json!({ "i": i })).unwrap();
        }
        manager.finish_stream(id, StreamPhase::Completed);

        let mut sub = manager.subscribe(id).unwrap();
        let mut got = Vec::new();
        while let Some(event) = sub.recv().await {
            got.push(event.data["i"].as_i64().unwrap());
        }
        assert_eq!(got, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn finishing_closes_subscriptions_after_drain() {
        let manager = StreamManager::default();
        let id = task();
        manager.start_stream(id, 1);
        let mut sub = manager.subscribe(id).unwrap();

        manager.publish(id, EventType::ErrorOccurred, json!({ "will_retry": false })).unwrap();
        manager.finish_stream(id, StreamPhase::Failed);

        let mut types = Vec::new();
        while let Some(event) = sub.recv().await {
            types.push(event.event_type);
        }
        assert_eq!(types, vec![EventType::Info, EventType::ErrorOccurred]);
        assert_eq!(manager.get_status(id).unwrap().subscriber_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_subscription_yields_keepalive() {
        let manager = StreamManager::new(StreamConfig {
            keepalive_secs: 30,
            ..StreamConfig::default()
        });
        let id = task();
        let started = manager.start_stream(id, 1);

        let mut sub = manager.subscribe(id).unwrap();
        let first = sub.recv().await.unwrap();
        assert_eq!(first.sequence_number, started.sequence_number);

        let keepalive = sub.recv().await.unwrap();
        assert!(keepalive.is_keepalive());
        assert!(keepalive.sequence_number > started.sequence_number);
        // keepalives are not buffered
        assert_eq!(manager.get_history(id, None).unwrap().len(), 1);

        let next = manager.publish(id, EventType::Info, json!({ "n": 1 })).unwrap();
        let live = sub.recv().await.unwrap();
        assert_eq!(live.sequence_number, next.sequence_number);
        assert!(live.sequence_number > keepalive.sequence_number);
    }

    #[tokio::test]
    async fn subscription_works_as_futures_stream() {
        use futures::StreamExt;

        let manager = StreamManager::default();
        let id = task();
        manager.start_stream(id, 1);
        manager.publish(id, EventType::AnalysisComplete, json!({})).unwrap();

        let events: Vec<StreamEvent> = manager.subscribe(id).unwrap().into_stream().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::AnalysisComplete);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned_on_publish() {
        let manager = StreamManager::default();
        let id = task();
        manager.start_stream(id, 1);

        let sub = manager.subscribe(id).unwrap();
        assert_eq!(manager.get_status(id).unwrap().subscriber_count, 1);
        drop(sub);

        manager.publish(id, EventType::Info, json!({})).unwrap();
        assert_eq!(manager.get_status(id).unwrap().subscriber_count, 0);
    }

    #[tokio::test]
    async fn cleanup_ends_open_subscriptions() {
        let manager = StreamManager::default();
        let id = task();
        manager.start_stream(id, 1);
        let mut sub = manager.subscribe(id).unwrap();

        assert!(manager.cleanup_stream(id));
        assert!(sub.recv().await.is_some()); // replayed start event
        assert!(sub.recv().await.is_none());
        assert!(manager.get_status(id).is_none());
        assert!(matches!(manager.subscribe(id), Err(TaskcastError::StreamNotFound(_))));
    }

    #[test]
    fn cleanup_can_retain_history() {
        let manager = StreamManager::new(StreamConfig {
            retain_history_on_cleanup: true,
            ..StreamConfig::default()
        });
        let id = task();
        manager.start_stream(id, 1);
        manager
            .add_listener(id, Arc::new(|_: &StreamEvent| -> Result<()> { Ok(()) }))
            .unwrap();

        assert!(manager.cleanup_stream(id));
        let status = manager.get_status(id).unwrap();
        assert_eq!(status.subscriber_count, 0);
        assert_eq!(status.buffered_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_cleanup_fires_after_delay() {
        let manager = StreamManager::default();
        let id = task();
        manager.start_stream(id, 1);
        manager.finish_stream(id, StreamPhase::Completed);

        manager.schedule_cleanup(id, Some(Duration::from_secs(60)));
        assert_eq!(manager.get_system_stats().pending_cleanups, 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(manager.get_status(id).is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(manager.get_status(id).is_none());
        assert_eq!(manager.get_system_stats().pending_cleanups, 0);
    }

    #[test]
    fn sweep_removes_only_streams_finished_before_cutoff() {
        use chrono::TimeZone;

        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let manager = StreamManager::with_ports(
            StreamConfig::default(),
            clock.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
        );
        let (old, recent, active) = (task(), task(), task());
        for id in [old, recent, active] {
            manager.start_stream(id, 1);
        }

        manager.finish_stream(old, StreamPhase::Completed);
        clock.advance(chrono::Duration::hours(2));
        manager.finish_stream(recent, StreamPhase::Failed);
        clock.advance(chrono::Duration::minutes(10));

        assert_eq!(manager.cleanup_old_streams(Duration::from_secs(3600)), 1);
        assert!(manager.get_status(old).is_none());
        assert!(manager.get_status(recent).is_some());
        assert!(manager.get_status(active).is_some());
    }

    #[test]
    fn system_stats_count_streams_and_subscribers() {
        let manager = StreamManager::default();
        let (a, b) = (task(), task());
        manager.start_stream(a, 1);
        manager.start_stream(b, 1);
        manager.add_listener(a, Arc::new(|_: &StreamEvent| -> Result<()> { Ok(()) })).unwrap();
        manager.finish_stream(b, StreamPhase::Cancelled);

        let stats = manager.get_system_stats();
        assert_eq!(stats.total_streams, 2);
        assert_eq!(stats.active_streams, 1);
        assert_eq!(stats.finished_streams, 1);
        assert_eq!(stats.total_subscribers, 1);
        assert_eq!(stats.events_published, 2);
    }
}
