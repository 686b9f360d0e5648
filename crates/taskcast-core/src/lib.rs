//! taskcast-core
//!
//! Background task scheduler with live progress broadcasting.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, progress, events）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, PricingTable）
//! - **runtime**: Handler の契約と registry
//! - **typed**: 型付き Task API（TaskPayload, Handler<T>）
//! - **tracker**: handler から進捗・コスト・警告を報告する ProgressTracker
//! - **stream**: task ごとの event stream（replay buffer + fan-out）
//! - **queue**: 優先度付き in-memory queue
//! - **scheduler**: TaskScheduler と worker loop
//! - **config** / **error** / **logging**: 周辺の土台

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod ports;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod stream;
pub mod tracker;
pub mod typed;

pub use config::{SchedulerConfig, StreamConfig, TaskcastConfig};
pub use domain::{EventType, Priority, StreamEvent, TaskId, TaskStatus, TaskType};
pub use error::{Result, TaskcastError};
pub use queue::{SchedulerStats, TaskRecord};
pub use runtime::{HandlerRegistry, TaskContext, TaskHandler};
pub use scheduler::{SchedulerBuilder, TaskRequest, TaskScheduler};
pub use stream::{StreamListener, StreamManager, Subscription};
pub use tracker::ProgressTracker;
pub use typed::{Handler, TaskPayload};
