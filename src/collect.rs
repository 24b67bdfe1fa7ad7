use crate::error::DispatchError;
use crate::handle::TaskHandle;

use std::sync::Arc;

use tracing::{debug, trace};

/// Progress of a batch collection, emitted after each handle is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectProgress {
  pub finished: usize,
  pub total: usize,
}

impl CollectProgress {
  /// Whole percent of handles collected, 0..=100.
  pub fn percent(&self) -> u8 {
    if self.total == 0 {
      return 100;
    }
    ((self.finished * 100) / self.total) as u8
  }
}

/// Callback receiving `CollectProgress` updates.
pub type ProgressFn = Arc<dyn Fn(CollectProgress) + Send + Sync + 'static>;

/// Collects every handle in input order.
///
/// A failed task never stops collection of the ones after it: the returned
/// vector always has one entry per handle. `progress`, if set, sees a strictly
/// increasing `finished` count ending at `handles.len()`.
pub async fn collect_all<R: Send + 'static>(
  handles: &mut [TaskHandle<R>],
  progress: Option<&ProgressFn>,
) -> Vec<Result<R, DispatchError>> {
  let total = handles.len();
  let mut results = Vec::with_capacity(total);

  for (index, handle) in handles.iter_mut().enumerate() {
    let task_id = handle.id();
    let outcome = handle.collect().await;
    if let Err(e) = &outcome {
      debug!(%task_id, position = index, "Collected failed task: {}", e);
    } else {
      trace!(%task_id, position = index, "Collected task.");
    }
    results.push(outcome);

    if let Some(report) = progress {
      report(CollectProgress {
        finished: index + 1,
        total,
      });
    }
  }

  results
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn percent_rounds_down() {
    assert_eq!(CollectProgress { finished: 1, total: 3 }.percent(), 33);
    assert_eq!(CollectProgress { finished: 2, total: 3 }.percent(), 66);
    assert_eq!(CollectProgress { finished: 3, total: 3 }.percent(), 100);
    assert_eq!(CollectProgress { finished: 0, total: 0 }.percent(), 100);
  }
}
