//! Handler<T> と、それを `TaskHandler` に変換する type erasure

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::TaskPayload;
use crate::domain::TaskId;
use crate::error::{Result, TaskcastError};
use crate::runtime::{TaskContext, TaskHandler};
use crate::tracker::ProgressTracker;

/// Handler for one payload type.
///
/// `Handler<ReviewAnalysis>` は `ReviewAnalysis` しか受け取れないので、
/// Task と Handler の対応はコンパイル時に決まる。
#[async_trait]
pub trait Handler<T: TaskPayload>: Send + Sync {
    fn total_stages(&self) -> u32 {
        1
    }

    async fn handle(
        &self,
        task_id: TaskId,
        payload: T,
        progress: &mut ProgressTracker,
    ) -> Result<serde_json::Value>;
}

/// `Handler<T>` を object-safe な [`TaskHandler`] として扱うアダプタ。
///
/// payload のデコードに失敗した場合は `TaskcastError::PayloadDecode` を返す。
/// 何度やり直しても結果は変わらないので、スケジューラはリトライしない。
pub struct TypedHandler<T: TaskPayload, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TaskPayload, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskPayload, H: Handler<T>> TaskHandler for TypedHandler<T, H> {
    fn total_stages(&self) -> u32 {
        self.handler.total_stages()
    }

    async fn handle(
        &self,
        ctx: &TaskContext,
        progress: &mut ProgressTracker,
    ) -> Result<serde_json::Value> {
        let payload: T =
            serde_json::from_value(ctx.payload.clone()).map_err(TaskcastError::PayloadDecode)?;
        self.handler.handle(ctx.task_id, payload, progress).await
    }
}
