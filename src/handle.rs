use crate::error::DispatchError;
use crate::task::{Diagnostic, TaskShared, TaskState};

use std::fmt;
use std::sync::Arc;

use fibre::oneshot;

/// A handle to a task submitted to an `ExecutionPool`.
///
/// Pairs the task's shared lifecycle record with the channel its outcome
/// arrives on. The outcome can be collected exactly once.
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) shared: Arc<TaskShared>,
  pub(crate) result_receiver: Option<oneshot::Receiver<Result<R, DispatchError>>>,
}

impl<R: Send + 'static> fmt::Debug for TaskHandle<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandle")
      .field("task_id", &self.shared.task_id)
      .field("state", &self.shared.state())
      .field("collected", &self.is_collected())
      .finish()
  }
}

impl<R: Send + 'static> TaskHandle<R> {
  pub(crate) fn new(shared: Arc<TaskShared>, result_receiver: oneshot::Receiver<Result<R, DispatchError>>) -> Self {
    Self {
      shared,
      result_receiver: Some(result_receiver),
    }
  }

  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.shared.task_id
  }

  /// Current lifecycle state. Does not consume the result.
  pub fn state(&self) -> TaskState {
    self.shared.state()
  }

  /// `true` once the task reached `Completed` or `Failed`.
  pub fn is_finished(&self) -> bool {
    self.shared.state().is_terminal()
  }

  /// Diagnostics the task has reported so far. Empty after collection.
  pub fn diagnostics(&self) -> Vec<Diagnostic> {
    self.shared.diagnostics()
  }

  /// `true` once `collect` has run and released the task's resources.
  pub fn is_collected(&self) -> bool {
    self.result_receiver.is_none()
  }

  /// Waits for the task to finish and returns its output.
  ///
  /// Error diagnostics reported by the work take precedence over its return
  /// value: a task that called `TaskContext::error` is a failure even if it
  /// returned `Ok`. The result channel and diagnostic stream are released on
  /// every path, so a second call fails.
  ///
  /// # Errors
  /// Returns `DispatchError::ResultUnavailable` if the result was already collected.
  /// Returns `DispatchError::TaskExecution` if the work failed or reported errors.
  /// Returns `DispatchError::TaskPanicked` if the work panicked.
  /// Returns `DispatchError::PoolClosed` if the pool closed before the task got a slot.
  /// Returns `DispatchError::ResultChannelError` if the task was dropped without reporting.
  pub async fn collect(&mut self) -> Result<R, DispatchError> {
    let task_id = self.shared.task_id;
    // Taking the receiver out of the handle scopes its lifetime to this call.
    let receiver = match self.result_receiver.take() {
      Some(rx) => rx,
      None => return Err(DispatchError::ResultUnavailable),
    };

    let received = receiver.recv().await;
    let reported_errors = self.shared.take_error_messages();

    match received {
      Ok(Ok(value)) if reported_errors.is_empty() => Ok(value),
      Ok(Ok(_discarded)) => {
        tracing::debug!(%task_id, "Task returned normally but reported errors; treating as failure.");
        Err(DispatchError::TaskExecution {
          task_id,
          messages: reported_errors,
        })
      }
      Ok(Err(DispatchError::TaskExecution { task_id, mut messages })) => {
        // Diagnostics come first, in the order the work emitted them.
        let mut combined = reported_errors;
        combined.append(&mut messages);
        Err(DispatchError::TaskExecution {
          task_id,
          messages: combined,
        })
      }
      Ok(Err(other)) => Err(other),
      Err(recv_error) => {
        tracing::warn!(%task_id, "Result channel receive error: {}", recv_error);
        Err(DispatchError::ResultChannelError(format!(
          "Task (id: {}) result channel unexpectedly closed: {}",
          task_id, recv_error
        )))
      }
    }
  }
}

impl<R: Send + 'static> Drop for TaskHandle<R> {
  fn drop(&mut self) {
    if self.result_receiver.is_some() {
      tracing::trace!(task_id = %self.shared.task_id, "TaskHandle dropped before its result was collected.");
    }
    self.shared.clear_diagnostics();
  }
}
