use crate::error::DispatchError;
use crate::handle::TaskHandle;
use crate::task::{Diagnostic, TaskState};

/// A point-in-time view of one task, as reported by `poll_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
  pub task_id: u64,
  pub state: TaskState,
  pub completed: bool,
  pub diagnostics: Vec<Diagnostic>,
  /// Set when the handle could not be queried, e.g. its result was already
  /// collected and its resources released.
  pub query_error: Option<DispatchError>,
}

impl StatusRecord {
  fn of<R: Send + 'static>(handle: &TaskHandle<R>) -> Self {
    let state = handle.state();
    let query_error = if handle.is_collected() {
      Some(DispatchError::ResultUnavailable)
    } else {
      None
    };
    Self {
      task_id: handle.id(),
      state,
      completed: state.is_terminal(),
      diagnostics: handle.diagnostics(),
      query_error,
    }
  }

  /// `true` while the task is waiting for a slot or executing.
  pub fn is_in_flight(&self) -> bool {
    !self.completed && self.query_error.is_none()
  }
}

/// Reports the state of every handle without blocking or consuming results.
///
/// Records come back in the same order as `handles`, one per handle.
pub fn poll_status<R: Send + 'static>(handles: &[TaskHandle<R>]) -> Vec<StatusRecord> {
  handles.iter().map(StatusRecord::of).collect()
}

/// Per-state counts over a set of status records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
  pub submitted: usize,
  pub running: usize,
  pub completed: usize,
  pub failed: usize,
  pub unavailable: usize,
}

impl StatusSummary {
  pub fn from_records(records: &[StatusRecord]) -> Self {
    let mut summary = StatusSummary::default();
    for record in records {
      if record.query_error.is_some() {
        summary.unavailable += 1;
        continue;
      }
      match record.state {
        TaskState::Submitted => summary.submitted += 1,
        TaskState::Running => summary.running += 1,
        TaskState::Completed => summary.completed += 1,
        TaskState::Failed => summary.failed += 1,
      }
    }
    summary
  }

  /// Tasks that have not reached a terminal state.
  pub fn in_flight(&self) -> usize {
    self.submitted + self.running
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::{DiagnosticLevel, TaskShared};

  fn record(state: TaskState, query_error: Option<DispatchError>) -> StatusRecord {
    StatusRecord {
      task_id: 0,
      state,
      completed: state.is_terminal(),
      diagnostics: Vec::new(),
      query_error,
    }
  }

  #[test]
  fn summary_counts_each_state() {
    let records = vec![
      record(TaskState::Submitted, None),
      record(TaskState::Running, None),
      record(TaskState::Running, None),
      record(TaskState::Completed, None),
      record(TaskState::Failed, None),
      record(TaskState::Completed, Some(DispatchError::ResultUnavailable)),
    ];
    let summary = StatusSummary::from_records(&records);
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.running, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.unavailable, 1);
    assert_eq!(summary.in_flight(), 3);
  }

  #[test]
  fn poll_preserves_order_and_reports_diagnostics() {
    let first = TaskShared::new(10);
    let second = TaskShared::new(11);
    second.advance(TaskState::Running);
    second.push_diagnostic(DiagnosticLevel::Warning, "halfway".to_string());

    let (_tx1, rx1) = fibre::oneshot::oneshot::<Result<u32, DispatchError>>();
    let (_tx2, rx2) = fibre::oneshot::oneshot::<Result<u32, DispatchError>>();
    let handles = vec![TaskHandle::new(first, rx1), TaskHandle::new(second, rx2)];

    let records = poll_status(&handles);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].task_id, 10);
    assert_eq!(records[0].state, TaskState::Submitted);
    assert!(records[0].is_in_flight());
    assert_eq!(records[1].task_id, 11);
    assert_eq!(records[1].state, TaskState::Running);
    assert_eq!(records[1].diagnostics.len(), 1);
    assert!(records[1].query_error.is_none());
  }
}
