//! 型付き Handler を [`HandlerRegistry`] に登録する

use std::sync::Arc;

use super::handler::{Handler, TypedHandler};
use super::task::TaskPayload;
use crate::error::Result;
use crate::runtime::HandlerRegistry;

impl HandlerRegistry {
    /// Register `handler` under `T::TYPE`.
    ///
    /// # 使用例
    /// ```ignore
    /// registry.register_typed::<ReviewAnalysis, _>(ReviewHandler)?;
    /// ```
    pub fn register_typed<T, H>(&mut self, handler: H) -> Result<()>
    where
        T: TaskPayload,
        H: Handler<T> + 'static,
    {
        self.register(T::TYPE, Arc::new(TypedHandler::new(handler)))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::domain::{TaskId, TaskType};
    use crate::error::TaskcastError;
    use crate::tracker::ProgressTracker;

    #[derive(Serialize, Deserialize)]
    struct Summarize {
        text: String,
    }

    impl TaskPayload for Summarize {
        const TYPE: &'static str = "test.summarize.v1";
    }

    #[derive(Serialize, Deserialize)]
    struct Translate {
        lang: String,
    }

    impl TaskPayload for Translate {
        const TYPE: &'static str = "test.translate.v1";
    }

    struct Echo;

    #[async_trait]
    impl Handler<Summarize> for Echo {
        async fn handle(
            &self,
            _task_id: TaskId,
            payload: Summarize,
            _progress: &mut ProgressTracker,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::Value::String(payload.text))
        }
    }

    #[async_trait]
    impl Handler<Translate> for Echo {
        async fn handle(
            &self,
            _task_id: TaskId,
            payload: Translate,
            _progress: &mut ProgressTracker,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::Value::String(payload.lang))
        }
    }

    #[test]
    fn registers_under_the_payload_type() {
        let mut registry = HandlerRegistry::new();
        registry.register_typed::<Summarize, _>(Echo).unwrap();
        registry.register_typed::<Translate, _>(Echo).unwrap();

        assert!(registry.get(&TaskType::new(Summarize::TYPE)).is_some());
        assert!(registry.get(&TaskType::new(Translate::TYPE)).is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register_typed::<Summarize, _>(Echo).unwrap();

        let result = registry.register_typed::<Summarize, _>(Echo);
        assert!(matches!(result, Err(TaskcastError::DuplicateHandler(_))));
    }
}
