use thiserror::Error;

/// Error type returned by work units. Anything convertible into a boxed error
/// (including `&str` and `String`) can be returned from a work future.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur within the `batch_dispatch` pool and dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
  #[error("Pool capacity {requested} is outside the allowed range 1..={max}")]
  InvalidCapacity { requested: usize, max: usize },

  #[error("Failed to schedule task on the pool: {0}")]
  SubmissionFailed(String),

  #[error("Task {task_id} failed: {}", .messages.join("; "))]
  TaskExecution { task_id: u64, messages: Vec<String> },

  #[error("Pool is closed, cannot accept new tasks")]
  PoolClosed,

  #[error("Task result already collected")]
  ResultUnavailable,

  #[error("Submitted task panicked")]
  TaskPanicked,

  #[error("Task result channel error (worker dropped before reporting): {0}")]
  ResultChannelError(String),

  #[error("No execution runtime available for the pool: {0}")]
  RuntimeUnavailable(String),
}
