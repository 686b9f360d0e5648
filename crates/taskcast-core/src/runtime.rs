use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{TaskId, TaskType};
use crate::error::{Result, TaskcastError};
use crate::tracker::ProgressTracker;

/// What a handler gets to know about the attempt it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    /// 0 on the first attempt, then the current `retry_count`.
    pub attempt: u32,
}

/// A handler for a specific task type.
///
/// The scheduler owns the tracker and lends it for the duration of the call;
/// handlers should report through it regularly, but nothing enforces a rate.
/// Returning `Err` (or panicking) counts as a failed attempt.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Number of stages reported through `update_stage`.
    fn total_stages(&self) -> u32 {
        1
    }

    async fn handle(
        &self,
        ctx: &TaskContext,
        progress: &mut ProgressTracker,
    ) -> Result<serde_json::Value>;
}

/// Registry of handlers (task_type -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Shared behind `Arc` and read-only at runtime, so no locks.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a task type. Registering twice is an error.
    pub fn register(
        &mut self,
        task_type: impl Into<TaskType>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        let task_type = task_type.into();
        if self.handlers.contains_key(&task_type) {
            return Err(TaskcastError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    /// Like [`get`](Self::get), but a missing handler is a `HandlerNotFound` error.
    pub fn resolve(&self, task_type: &TaskType) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .get(task_type)
            .cloned()
            .ok_or_else(|| TaskcastError::HandlerNotFound(task_type.clone()))
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(&TaskType::new(task_type))
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SystemClock;
    use ulid::Ulid;

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        fn total_stages(&self) -> u32 {
            2
        }

        async fn handle(
            &self,
            ctx: &TaskContext,
            progress: &mut ProgressTracker,
        ) -> Result<serde_json::Value> {
            progress.update_stage("only", 100.0);
            Ok(ctx.payload.clone())
        }
    }

    fn ctx(task_type: &str) -> TaskContext {
        TaskContext {
            task_id: TaskId::from_ulid(Ulid::new()),
            task_type: TaskType::new(task_type),
            payload: serde_json::json!({ "q": "hello" }),
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn resolves_and_runs_registered_handler() {
        let mut reg = HandlerRegistry::new();
        reg.register("ok", Arc::new(OkHandler)).unwrap();

        let ctx = ctx("ok");
        let handler = reg.resolve(&ctx.task_type).unwrap();
        assert_eq!(handler.total_stages(), 2);

        let mut tracker = ProgressTracker::new(ctx.task_id, 2, Arc::new(SystemClock));
        let out = handler.handle(&ctx, &mut tracker).await.unwrap();

        assert_eq!(out, ctx.payload);
        assert_eq!(tracker.overall_progress(), 50.0);
    }

    #[test]
    fn missing_handler_is_an_error() {
        let reg = HandlerRegistry::new();
        let err = reg.resolve(&TaskType::new("missing")).err().unwrap();
        assert!(matches!(err, TaskcastError::HandlerNotFound(t) if t.as_str() == "missing"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = HandlerRegistry::new();
        reg.register("ok", Arc::new(OkHandler)).unwrap();
        let err = reg.register("ok", Arc::new(OkHandler)).unwrap_err();

        assert!(matches!(err, TaskcastError::DuplicateHandler(_)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn lists_registered_types_sorted() {
        let mut reg = HandlerRegistry::new();
        reg.register("b", Arc::new(OkHandler)).unwrap();
        reg.register("a", Arc::new(OkHandler)).unwrap();

        assert_eq!(reg.task_types(), vec![TaskType::new("a"), TaskType::new("b")]);
        assert!(reg.contains("a"));
        assert!(!reg.contains("c"));
    }
}
