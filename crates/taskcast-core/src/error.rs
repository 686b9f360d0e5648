use thiserror::Error;

use crate::domain::{TaskEvent, TaskId, TaskStatus, TaskType};

pub type Result<T, E = TaskcastError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TaskcastError {
    #[error("handler not found for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),

    #[error("missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("stream not found for {0}")]
    StreamNotFound(TaskId),

    #[error("invalid transition: {event:?} is not allowed from {from:?}")]
    InvalidTransition { from: TaskStatus, event: TaskEvent },

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The task's stored payload does not match the typed handler's input.
    #[error("payload decode: {0}")]
    PayloadDecode(serde_json::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Handler(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("listener failed: {0}")]
    Listener(String),
}

impl TaskcastError {
    /// Shorthand for handler implementations.
    pub fn handler(message: impl std::fmt::Display) -> Self {
        Self::Handler(message.to_string())
    }

    /// Whether the scheduler may retry a task that failed with this error.
    ///
    /// A missing handler or an undecodable payload fails the same way on every
    /// attempt, so those go straight to FAILED.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::HandlerNotFound(_) | Self::PayloadDecode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_handler_is_not_retryable() {
        let err = TaskcastError::HandlerNotFound(TaskType::new("nope"));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("handler"));
    }

    #[test]
    fn handler_and_panic_errors_are_retryable() {
        assert!(TaskcastError::handler("boom").is_retryable());
        assert!(TaskcastError::Panicked("oops".into()).is_retryable());
    }

    #[test]
    fn payload_decode_is_not_retryable() {
        let err = TaskcastError::PayloadDecode(serde_json::from_str::<u32>("\"x\"").unwrap_err());
        assert!(!err.is_retryable());
    }

    #[test]
    fn json_errors_from_handlers_are_retryable() {
        let err: TaskcastError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, TaskcastError::Json(_)));
        assert!(err.is_retryable());
    }
}
