//! Error taxonomy for the scheduler core.
//!
//! Validation errors are raised synchronously to the caller of `add_task`;
//! execution errors never propagate to a caller directly — they materialize
//! as a task's terminal status and as `TASK_FAILED`/`TASK_CANCELLED` events
//! (see `events.rs`).

use thiserror::Error;

use crate::task::TaskId;

/// A specialized `Result` type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors raised synchronously from `Scheduler::add_task`.
///
/// None of these mutate scheduler state — insertion either fully succeeds
/// or fails with nothing recorded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Queue size limit reached ({limit} tasks)")]
    QueueFull { limit: usize },

    #[error("Task with id '{0}' already exists")]
    DuplicateId(TaskId),

    #[error("Unknown dependency '{0}' referenced by task '{1}'")]
    UnknownDependency(TaskId, TaskId),

    #[error("Adding task '{0}' would create a dependency cycle")]
    DependencyCycle(TaskId),

    #[error("No executor registered for task type '{0}'")]
    NoExecutor(String),
}

/// The reason a task attempt terminated without completing, surfaced on
/// `Task::error` and in `TASK_FAILED`/`TASK_CANCELLED` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The executor returned or threw an error.
    ExecutorError(String),
    /// The per-attempt timeout elapsed before the executor settled.
    Timeout,
    /// The task was cancelled via `cancel_task`.
    Cancelled,
    /// A dependency terminated in `Failed` or `Cancelled`.
    DependencyFailed { dependency: TaskId },
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExecutorError(msg) => write!(f, "{msg}"),
            Self::Timeout => write!(f, "Task timeout"),
            Self::Cancelled => write!(f, "Task cancelled"),
            Self::DependencyFailed { dependency } => {
                write!(f, "dependency '{dependency}' failed")
            }
        }
    }
}

impl ExecutionError {
    /// Whether this error kind consumes a retry attempt (§7: "Retries
    /// consume transient `ExecutorError` or `TaskTimeout`; `Cancelled`
    /// never retries" — `DependencyFailed` never retries either).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExecutorError(_) | Self::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_and_timeout_errors_are_retryable() {
        assert!(ExecutionError::ExecutorError("boom".into()).is_retryable());
        assert!(ExecutionError::Timeout.is_retryable());
    }

    #[test]
    fn cancelled_and_dependency_failed_never_retry() {
        assert!(!ExecutionError::Cancelled.is_retryable());
        assert!(!ExecutionError::DependencyFailed {
            dependency: TaskId::from("a")
        }
        .is_retryable());
    }

    #[test]
    fn timeout_display_matches_spec_wording() {
        assert_eq!(ExecutionError::Timeout.to_string(), "Task timeout");
    }
}
