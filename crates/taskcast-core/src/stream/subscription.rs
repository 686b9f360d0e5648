//! Subscriber side of the broadcaster.
//!
//! Two flavours:
//! - [`StreamListener`]: synchronous callback, run by the publishing thread.
//! - [`Subscription`]: pull-based, replays the buffer then follows live events.

use std::collections::VecDeque;
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;

use super::StreamManager;
use crate::domain::{EventType, StreamEvent, SubscriberId, TaskId};
use crate::error::TaskcastError;

/// Callback subscriber.
///
/// Called outside the stream lock, in sequence order, one event at a time.
/// It may publish through the [`StreamManager`]; that event is delivered once
/// the current one has reached every listener. An `Err` (or a panic) is
/// logged and the event still reaches every other subscriber.
pub trait StreamListener: Send + Sync {
    fn on_event(&self, event: &StreamEvent) -> Result<(), TaskcastError>;

    fn name(&self) -> &str {
        "listener"
    }
}

impl<F> StreamListener for F
where
    F: Fn(&StreamEvent) -> Result<(), TaskcastError> + Send + Sync,
{
    fn on_event(&self, event: &StreamEvent) -> Result<(), TaskcastError> {
        self(event)
    }
}

/// A live view of one task's stream.
///
/// Yields the buffered history first, then new events in sequence order.
/// After `keepalive` without an event it yields a synthetic INFO keepalive.
/// Ends after ANALYSIS_COMPLETE, once a finished stream has been drained, or
/// when the stream is cleaned up.
pub struct Subscription {
    id: SubscriberId,
    task_id: TaskId,
    replay: VecDeque<StreamEvent>,
    live: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    keepalive: Duration,
    manager: StreamManager,
    last_sequence: Option<u64>,
    done: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        task_id: TaskId,
        replay: VecDeque<StreamEvent>,
        live: Option<mpsc::UnboundedReceiver<StreamEvent>>,
        keepalive: Duration,
        manager: StreamManager,
    ) -> Self {
        Self {
            id,
            task_id,
            replay,
            live,
            keepalive,
            manager,
            last_sequence: None,
            done: false,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        loop {
            if self.done {
                return None;
            }

            let event = if let Some(event) = self.replay.pop_front() {
                event
            } else {
                let Some(rx) = self.live.as_mut() else {
                    self.done = true;
                    return None;
                };
                match tokio::time::timeout(self.keepalive, rx.recv()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        self.done = true;
                        return None;
                    }
                    Err(_) => {
                        let event = self.manager.idle_tick(self.task_id, rx);
                        if event.is_keepalive() {
                            return Some(event);
                        }
                        event
                    }
                }
            };

            // replay と live の境界で重複が出ないことは登録時に保証しているが、念のため弾く
            if self.last_sequence.is_some_and(|last| event.sequence_number <= last) {
                continue;
            }
            self.last_sequence = Some(event.sequence_number);
            if event.event_type == EventType::AnalysisComplete {
                self.done = true;
            }
            return Some(event);
        }
    }

    /// Adapt into a `futures::Stream`, e.g. for an SSE response body.
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}
