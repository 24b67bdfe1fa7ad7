use crate::error::{BoxError, DispatchError};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// The future a work unit produces for one task.
pub type WorkFuture<R> = Pin<Box<dyn Future<Output = Result<R, BoxError>> + Send + 'static>>;

/// Lifecycle of a submitted task.
///
/// States only move forward: `Submitted -> Running -> {Completed | Failed}`.
/// A task never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskState {
  /// Accepted by the pool, waiting for a free slot.
  Submitted = 0,
  /// Holding a slot and executing.
  Running = 1,
  /// Finished with a normal return and no error diagnostics.
  Completed = 2,
  /// Finished with an error, a panic, error diagnostics, or was abandoned by a closing pool.
  Failed = 3,
}

impl TaskState {
  fn from_u8(raw: u8) -> Self {
    match raw {
      0 => TaskState::Submitted,
      1 => TaskState::Running,
      2 => TaskState::Completed,
      _ => TaskState::Failed,
    }
  }

  /// Returns `true` for `Completed` and `Failed`.
  pub fn is_terminal(self) -> bool {
    matches!(self, TaskState::Completed | TaskState::Failed)
  }
}

impl<R> From<&Result<R, DispatchError>> for TaskState {
  fn from(outcome: &Result<R, DispatchError>) -> Self {
    match outcome {
      Ok(_) => TaskState::Completed,
      Err(_) => TaskState::Failed,
    }
  }
}

/// A positional argument handed to a work unit.
///
/// `List` is spliced into the argument vector as a contiguous run of
/// individual arguments, not passed as one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg<A> {
  Single(A),
  List(Vec<A>),
}

impl<A> From<A> for Arg<A> {
  fn from(value: A) -> Self {
    Arg::Single(value)
  }
}

/// Flattens `List` entries one level, preserving order.
pub fn flatten_args<A>(args: Vec<Arg<A>>) -> Vec<A> {
  let mut positional = Vec::with_capacity(args.len());
  for arg in args {
    match arg {
      Arg::Single(value) => positional.push(value),
      Arg::List(values) => positional.extend(values),
    }
  }
  positional
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticLevel {
  Warning,
  Error,
}

/// One entry of a task's diagnostic stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
  pub level: DiagnosticLevel,
  pub message: String,
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.level {
      DiagnosticLevel::Warning => write!(f, "warning: {}", self.message),
      DiagnosticLevel::Error => write!(f, "error: {}", self.message),
    }
  }
}

/// State shared between a `TaskHandle`, the running task, and the pool.
#[derive(Debug)]
pub(crate) struct TaskShared {
  pub(crate) task_id: u64,
  state: AtomicU8,
  diagnostics: Mutex<Vec<Diagnostic>>,
}

impl TaskShared {
  pub(crate) fn new(task_id: u64) -> Arc<Self> {
    Arc::new(Self {
      task_id,
      state: AtomicU8::new(TaskState::Submitted as u8),
      diagnostics: Mutex::new(Vec::new()),
    })
  }

  pub(crate) fn state(&self) -> TaskState {
    TaskState::from_u8(self.state.load(Ordering::Acquire))
  }

  /// Moves the state forward. Requests to move backwards are ignored.
  pub(crate) fn advance(&self, next: TaskState) -> TaskState {
    let previous = self.state.fetch_max(next as u8, Ordering::AcqRel);
    TaskState::from_u8(previous.max(next as u8))
  }

  pub(crate) fn push_diagnostic(&self, level: DiagnosticLevel, message: String) {
    self.diagnostics.lock().push(Diagnostic { level, message });
  }

  pub(crate) fn diagnostics(&self) -> Vec<Diagnostic> {
    self.diagnostics.lock().clone()
  }

  pub(crate) fn has_errors(&self) -> bool {
    self
      .diagnostics
      .lock()
      .iter()
      .any(|d| d.level == DiagnosticLevel::Error)
  }

  /// Drains the error entries, leaving the stream empty.
  pub(crate) fn take_error_messages(&self) -> Vec<String> {
    let drained = std::mem::take(&mut *self.diagnostics.lock());
    drained
      .into_iter()
      .filter(|d| d.level == DiagnosticLevel::Error)
      .map(|d| d.message)
      .collect()
  }

  pub(crate) fn clear_diagnostics(&self) {
    self.diagnostics.lock().clear();
  }
}

/// Per-task context handed to a work unit.
///
/// Work reports problems through `error`; any error entry marks the task as
/// failed even if the work then returns normally.
#[derive(Debug, Clone)]
pub struct TaskContext {
  pub(crate) shared: Arc<TaskShared>,
}

impl TaskContext {
  pub fn task_id(&self) -> u64 {
    self.shared.task_id
  }

  /// Appends an error entry to this task's diagnostic stream.
  pub fn error(&self, message: impl Into<String>) {
    let message = message.into();
    tracing::debug!(task_id = %self.shared.task_id, %message, "Task reported an error diagnostic.");
    self.shared.push_diagnostic(DiagnosticLevel::Error, message);
  }

  /// Appends a warning entry. Warnings are visible to status polling but never fail a task.
  pub fn warning(&self, message: impl Into<String>) {
    self.shared.push_diagnostic(DiagnosticLevel::Warning, message.into());
  }
}

/// A reusable, parameterized computation run once per task.
///
/// Implemented for any `Fn(TaskContext, Vec<A>) -> impl Future<Output = Result<R, BoxError>>`.
pub trait WorkUnit<A, R>: Send + Sync + 'static {
  fn run(&self, ctx: TaskContext, args: Vec<A>) -> WorkFuture<R>;
}

impl<A, R, F, Fut> WorkUnit<A, R> for F
where
  A: Send + 'static,
  R: Send + 'static,
  F: Fn(TaskContext, Vec<A>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
  fn run(&self, ctx: TaskContext, args: Vec<A>) -> WorkFuture<R> {
    Box::pin(self(ctx, args))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn flatten_splices_lists_one_level() {
    let args = vec![
      Arg::Single(1),
      Arg::List(vec![2, 3]),
      Arg::Single(4),
      Arg::List(vec![]),
      Arg::List(vec![5]),
    ];
    assert_eq!(flatten_args(args), vec![1, 2, 3, 4, 5]);
  }

  #[test]
  fn nested_lists_stay_single_values() {
    let args: Vec<Arg<Vec<u8>>> = vec![Arg::List(vec![vec![1, 2], vec![3]])];
    assert_eq!(flatten_args(args), vec![vec![1, 2], vec![3]]);
  }

  #[test]
  fn state_never_regresses() {
    let shared = TaskShared::new(7);
    assert_eq!(shared.state(), TaskState::Submitted);
    assert_eq!(shared.advance(TaskState::Running), TaskState::Running);
    assert_eq!(shared.advance(TaskState::Completed), TaskState::Completed);
    assert_eq!(shared.advance(TaskState::Running), TaskState::Completed);
    assert_eq!(shared.advance(TaskState::Submitted), TaskState::Completed);
    assert_eq!(shared.state(), TaskState::Completed);
  }

  #[test]
  fn only_error_entries_count_as_failures() {
    let shared = TaskShared::new(1);
    let ctx = TaskContext { shared: shared.clone() };
    ctx.warning("slow disk");
    assert!(!shared.has_errors());
    ctx.error("disk full");
    assert!(shared.has_errors());
    assert_eq!(shared.diagnostics().len(), 2);
    assert_eq!(shared.take_error_messages(), vec!["disk full".to_string()]);
    assert!(shared.diagnostics().is_empty());
  }

  #[test]
  fn diagnostic_display_includes_level() {
    let d = Diagnostic {
      level: DiagnosticLevel::Warning,
      message: "retrying".into(),
    };
    assert_eq!(d.to_string(), "warning: retrying");
  }
}
