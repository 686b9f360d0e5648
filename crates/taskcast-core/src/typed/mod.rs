//! Typed - 型付き Task API
//!
//! task_type の typo を型で排除し、payload のデコードを Handler から切り離す。
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskPayload` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: [`crate::runtime::TaskHandler`] - object-safe, JSON payload
//!
//! `TypedHandler<T, H>` が両者をつなぐ。

pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{Handler, TypedHandler};
pub use self::task::TaskPayload;
