//! SchedulerBuilder - スケジューラの構築とワイヤリング
//!
//! - Builder パターン
//! - 起動時検証（Fail-fast）: 期待される task_type が揃っていなければ build() で落とす

use std::sync::Arc;

use super::TaskScheduler;
use crate::config::TaskcastConfig;
use crate::domain::TaskType;
use crate::error::{Result, TaskcastError};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::runtime::{HandlerRegistry, TaskHandler};
use crate::typed::{Handler, TaskPayload};

/// Builds a [`TaskScheduler`].
///
/// # 使用例
/// ```ignore
/// let scheduler = SchedulerBuilder::new()
///     .register_typed::<ReviewAnalysis, _>(ReviewHandler)?
///     .config(TaskcastConfig::from_env()?)
///     .expect_task_types(&[ReviewAnalysis::TYPE])
///     .build()?;
/// ```
pub struct SchedulerBuilder {
    registry: HandlerRegistry,
    config: TaskcastConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    expected_task_types: Option<Vec<String>>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            config: TaskcastConfig::default(),
            clock: None,
            ids: None,
            expected_task_types: None,
        }
    }

    pub fn register(
        mut self,
        task_type: impl Into<TaskType>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self> {
        self.registry.register(task_type, handler)?;
        Ok(self)
    }

    pub fn register_typed<T, H>(mut self, handler: H) -> Result<Self>
    where
        T: TaskPayload,
        H: Handler<T> + 'static,
    {
        self.registry.register_typed::<T, H>(handler)?;
        Ok(self)
    }

    pub fn config(mut self, config: TaskcastConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// 期待される task_type を設定（build() 時に検証）
    pub fn expect_task_types(mut self, task_types: &[&str]) -> Self {
        self.expected_task_types = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// # 検証
    /// - config が妥当であること
    /// - expect_task_types() の task_type が全て登録済みであること
    pub fn build(self) -> Result<TaskScheduler> {
        if let Some(expected) = &self.expected_task_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(TaskcastError::MissingTaskTypes(missing));
            }
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        TaskScheduler::from_parts(self.registry, self.config, clock, ids)
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::runtime::TaskContext;
    use crate::tracker::ProgressTracker;

    struct Noop;

    #[async_trait]
    impl TaskHandler for Noop {
        async fn handle(
            &self,
            _ctx: &TaskContext,
            _progress: &mut ProgressTracker,
        ) -> Result<serde_json::Value> {
            Ok(json!(null))
        }
    }

    #[test]
    fn build_success() {
        let scheduler = SchedulerBuilder::new()
            .register("analysis", Arc::new(Noop))
            .unwrap()
            .expect_task_types(&["analysis"])
            .build();
        assert!(scheduler.is_ok());
    }

    #[test]
    fn build_fails_fast_on_missing_task_types() {
        let result = SchedulerBuilder::new()
            .register("analysis", Arc::new(Noop))
            .unwrap()
            .expect_task_types(&["analysis", "summary"])
            .build();
        assert!(matches!(
            result,
            Err(TaskcastError::MissingTaskTypes(missing)) if missing == vec!["summary".to_string()]
        ));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut config = TaskcastConfig::default();
        config.scheduler.max_concurrent = 0;

        let result = SchedulerBuilder::new().config(config).build();
        assert!(matches!(result, Err(TaskcastError::Config(_))));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let result = SchedulerBuilder::new()
            .register("analysis", Arc::new(Noop))
            .unwrap()
            .register("analysis", Arc::new(Noop));
        assert!(matches!(result, Err(TaskcastError::DuplicateHandler(_))));
    }
}
