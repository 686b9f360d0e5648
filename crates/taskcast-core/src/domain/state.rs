//! Task state machine.
//!
//! The whole lifecycle is one pure function so the retry rules can be tested
//! without a queue or a runtime:
//!
//! | from       | event                 | condition                  | to                        |
//! |------------|-----------------------|----------------------------|---------------------------|
//! | Pending    | Dispatched            |                            | Processing                |
//! | Pending    | CancelRequested       |                            | Cancelled                 |
//! | Processing | Succeeded             |                            | Completed                 |
//! | Processing | Failed { retryable }  | retryable && rc < max      | Pending (rc + 1)          |
//! | Processing | Failed { .. }         | otherwise                  | Failed                    |

use serde::{Deserialize, Serialize};

use super::TaskStatus;
use crate::error::TaskcastError;

/// Something that happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEvent {
    Dispatched,
    Succeeded,
    Failed { retryable: bool },
    CancelRequested,
}

/// Result of applying a [`TaskEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: TaskStatus,
    pub retry_count: u32,
}

impl Transition {
    /// Did this transition send the task back to its bucket?
    pub fn is_retry(&self) -> bool {
        self.next == TaskStatus::Pending
    }
}

/// Apply `event` to a task currently in `status`.
pub fn transition(
    status: TaskStatus,
    event: TaskEvent,
    retry_count: u32,
    max_retries: u32,
) -> Result<Transition, TaskcastError> {
    let next = match (status, event) {
        (TaskStatus::Pending, TaskEvent::Dispatched) => TaskStatus::Processing,
        (TaskStatus::Pending, TaskEvent::CancelRequested) => TaskStatus::Cancelled,
        (TaskStatus::Processing, TaskEvent::Succeeded) => TaskStatus::Completed,
        (TaskStatus::Processing, TaskEvent::Failed { retryable }) => {
            if retryable && retry_count < max_retries {
                return Ok(Transition {
                    next: TaskStatus::Pending,
                    retry_count: retry_count + 1,
                });
            }
            TaskStatus::Failed
        }
        (from, event) => return Err(TaskcastError::InvalidTransition { from, event }),
    };

    Ok(Transition { next, retry_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::dispatch(TaskStatus::Pending, TaskEvent::Dispatched, 0, TaskStatus::Processing, 0)]
    #[case::cancel(TaskStatus::Pending, TaskEvent::CancelRequested, 0, TaskStatus::Cancelled, 0)]
    #[case::success(TaskStatus::Processing, TaskEvent::Succeeded, 1, TaskStatus::Completed, 1)]
    #[case::first_failure(
        TaskStatus::Processing,
        TaskEvent::Failed { retryable: true },
        0,
        TaskStatus::Pending,
        1
    )]
    #[case::last_retry(
        TaskStatus::Processing,
        TaskEvent::Failed { retryable: true },
        2,
        TaskStatus::Pending,
        3
    )]
    #[case::exhausted(
        TaskStatus::Processing,
        TaskEvent::Failed { retryable: true },
        3,
        TaskStatus::Failed,
        3
    )]
    #[case::non_retryable(
        TaskStatus::Processing,
        TaskEvent::Failed { retryable: false },
        0,
        TaskStatus::Failed,
        0
    )]
    fn allowed_transitions(
        #[case] from: TaskStatus,
        #[case] event: TaskEvent,
        #[case] retry_count: u32,
        #[case] next: TaskStatus,
        #[case] next_retry_count: u32,
    ) {
        let t = transition(from, event, retry_count, 3).unwrap();
        assert_eq!(t.next, next);
        assert_eq!(t.retry_count, next_retry_count);
    }

    #[rstest]
    #[case::cancel_processing(TaskStatus::Processing, TaskEvent::CancelRequested)]
    #[case::cancel_completed(TaskStatus::Completed, TaskEvent::CancelRequested)]
    #[case::redispatch(TaskStatus::Processing, TaskEvent::Dispatched)]
    #[case::revive_failed(TaskStatus::Failed, TaskEvent::Dispatched)]
    #[case::succeed_pending(TaskStatus::Pending, TaskEvent::Succeeded)]
    #[case::fail_cancelled(TaskStatus::Cancelled, TaskEvent::Failed { retryable: true })]
    fn rejected_transitions(#[case] from: TaskStatus, #[case] event: TaskEvent) {
        let err = transition(from, event, 0, 3).unwrap_err();
        assert!(matches!(err, TaskcastError::InvalidTransition { .. }));
    }

    #[test]
    fn zero_max_retries_fails_immediately() {
        let t = transition(TaskStatus::Processing, TaskEvent::Failed { retryable: true }, 0, 0)
            .unwrap();
        assert_eq!(t.next, TaskStatus::Failed);
        assert!(!t.is_retry());
    }

    #[test]
    fn retry_count_never_exceeds_max() {
        let max = 4;
        let mut status = TaskStatus::Pending;
        let mut retry_count = 0;
        let mut failed_transitions = 0;

        for _ in 0..20 {
            if status.is_terminal() {
                break;
            }
            let t = transition(status, TaskEvent::Dispatched, retry_count, max).unwrap();
            let t = transition(t.next, TaskEvent::Failed { retryable: true }, t.retry_count, max)
                .unwrap();
            assert!(t.retry_count <= max);
            assert!(t.retry_count >= retry_count);
            if t.next == TaskStatus::Failed {
                failed_transitions += 1;
            }
            status = t.next;
            retry_count = t.retry_count;
        }

        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(retry_count, max);
        assert_eq!(failed_transitions, 1);
    }
}
