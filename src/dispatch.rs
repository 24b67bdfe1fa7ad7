use crate::collect::{collect_all, ProgressFn};
use crate::error::DispatchError;
use crate::handle::TaskHandle;
use crate::pool::{ExecutionMode, ExecutionPool, PoolConfig};
use crate::status::{poll_status, StatusSummary};
use crate::task::{Arg, WorkUnit};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, trace};

/// Upper bound on the pool size the dispatcher opens.
pub const MAX_DISPATCH_CAPACITY: usize = 32;

/// Interval between slot and completion checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Called with the pool right after the dispatcher opened it.
///
/// Observation only: the dispatcher owns the pool and closes it when the call
/// returns. Closing it early fails whatever has not finished or been submitted.
#[doc(hidden)]
pub type PoolOpenHook = Arc<dyn Fn(&Arc<ExecutionPool>) + Send + Sync + 'static>;

/// Which arguments each task receives, resolved once from the two dispatch flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentShape {
  /// The item, followed by the broadcast arguments.
  ItemAndBroadcast,
  BroadcastOnly,
  ItemOnly,
  NoArguments,
}

impl ArgumentShape {
  pub fn from_flags(broadcast: bool, include_item: bool) -> Self {
    match (broadcast, include_item) {
      (true, true) => ArgumentShape::ItemAndBroadcast,
      (true, false) => ArgumentShape::BroadcastOnly,
      (false, true) => ArgumentShape::ItemOnly,
      (false, false) => ArgumentShape::NoArguments,
    }
  }

  /// Builds the argument list for one item.
  pub fn compose<A: Clone>(self, item: A, broadcast_args: &[Arg<A>]) -> Vec<Arg<A>> {
    match self {
      ArgumentShape::ItemAndBroadcast => {
        let mut args = Vec::with_capacity(broadcast_args.len() + 1);
        args.push(Arg::Single(item));
        args.extend_from_slice(broadcast_args);
        args
      }
      ArgumentShape::BroadcastOnly => broadcast_args.to_vec(),
      ArgumentShape::ItemOnly => vec![Arg::Single(item)],
      ArgumentShape::NoArguments => Vec::new(),
    }
  }
}

/// Pool size for a batch: `min(item_count, 32)` by default, caller values clamped to `1..=32`.
pub fn resolve_capacity(requested: Option<usize>, item_count: usize) -> usize {
  requested
    .unwrap_or(item_count)
    .clamp(1, MAX_DISPATCH_CAPACITY)
}

/// Settings for one `dispatch` call.
pub struct DispatchOptions<A> {
  capacity: Option<usize>,
  mode: ExecutionMode,
  broadcast_args: Vec<Arg<A>>,
  broadcast: bool,
  include_item: bool,
  poll_interval: Duration,
  progress: Option<ProgressFn>,
  pool_name: String,
  on_pool_open: Option<PoolOpenHook>,
}

impl<A> Default for DispatchOptions<A> {
  fn default() -> Self {
    Self {
      capacity: None,
      mode: ExecutionMode::Shared,
      broadcast_args: Vec::new(),
      broadcast: false,
      include_item: true,
      poll_interval: DEFAULT_POLL_INTERVAL,
      progress: None,
      pool_name: "dispatch_pool".to_string(),
      on_pool_open: None,
    }
  }
}

impl<A: fmt::Debug> fmt::Debug for DispatchOptions<A> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DispatchOptions")
      .field("capacity", &self.capacity)
      .field("mode", &self.mode)
      .field("broadcast_args", &self.broadcast_args)
      .field("broadcast", &self.broadcast)
      .field("include_item", &self.include_item)
      .field("poll_interval", &self.poll_interval)
      .field("has_progress", &self.progress.is_some())
      .field("pool_name", &self.pool_name)
      .finish_non_exhaustive()
  }
}

impl<A> DispatchOptions<A> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Requested pool size, clamped to `1..=32`.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.capacity = Some(capacity);
    self
  }

  pub fn mode(mut self, mode: ExecutionMode) -> Self {
    self.mode = mode;
    self
  }

  /// Sets arguments passed identically to every task and enables broadcasting.
  pub fn broadcast_args(mut self, args: Vec<Arg<A>>) -> Self {
    self.broadcast_args = args;
    self.broadcast = true;
    self
  }

  /// Turns broadcasting of the configured arguments on or off.
  pub fn broadcast(mut self, enabled: bool) -> Self {
    self.broadcast = enabled;
    self
  }

  /// Whether each task receives its own item as the first argument. Defaults to `true`.
  pub fn include_item(mut self, enabled: bool) -> Self {
    self.include_item = enabled;
    self
  }

  pub fn poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  pub fn progress(mut self, progress: ProgressFn) -> Self {
    self.progress = Some(progress);
    self
  }

  pub fn pool_name(mut self, name: impl Into<String>) -> Self {
    self.pool_name = name.into();
    self
  }

  /// Registers a hook that sees the pool once it is open. See [`PoolOpenHook`].
  #[doc(hidden)]
  pub fn on_pool_open(mut self, hook: PoolOpenHook) -> Self {
    self.on_pool_open = Some(hook);
    self
  }
}

/// Closes the pool when the dispatch scope ends, however it ends.
struct PoolTeardown {
  pool: Arc<ExecutionPool>,
}

impl Drop for PoolTeardown {
  fn drop(&mut self) {
    if self.pool.close() {
      debug!(pool_name = %self.pool.name(), "Dispatch teardown closed the pool.");
    } else {
      trace!(pool_name = %self.pool.name(), "Dispatch teardown found the pool already closed.");
    }
  }
}

/// Runs `work` once per item on a bounded pool and returns the outcomes in item order.
///
/// The outer `Result` fails only when orchestration itself could not proceed
/// (the pool could not be opened, or a submission was refused). Task failures
/// are reported per item inside the returned vector. The pool is closed on
/// every exit path.
pub async fn dispatch<A, R, W>(
  items: Vec<A>,
  work: W,
  options: DispatchOptions<A>,
) -> Result<Vec<Result<R, DispatchError>>, DispatchError>
where
  A: Clone + Send + 'static,
  R: Send + 'static,
  W: WorkUnit<A, R>,
{
  if items.is_empty() {
    debug!(pool_name = %options.pool_name, "Dispatch called with no items; nothing to do.");
    return Ok(Vec::new());
  }

  let item_count = items.len();
  let capacity = resolve_capacity(options.capacity, item_count);
  let shape = ArgumentShape::from_flags(options.broadcast, options.include_item);
  if !options.broadcast && !options.broadcast_args.is_empty() {
    debug!(pool_name = %options.pool_name, "Broadcast disabled; configured broadcast arguments are ignored.");
  }

  let pool = ExecutionPool::open_with(PoolConfig::new(capacity, options.mode).with_name(options.pool_name.clone()))?;
  let teardown = PoolTeardown { pool: pool.clone() };
  if let Some(hook) = &options.on_pool_open {
    hook(&pool);
  }

  info!(pool_name = %pool.name(), item_count, capacity, ?shape, "Dispatching batch.");

  let work = Arc::new(work);
  let mut handles: Vec<TaskHandle<R>> = Vec::with_capacity(item_count);

  for (position, item) in items.into_iter().enumerate() {
    wait_for_free_slot(&pool, options.poll_interval).await;
    let args = shape.compose(item, &options.broadcast_args);
    match pool.submit(&work, args) {
      Ok(handle) => {
        trace!(pool_name = %pool.name(), position, task_id = handle.id(), "Item submitted.");
        handles.push(handle);
      }
      Err(e) => {
        error!(pool_name = %pool.name(), position, "Dispatch: Submission failed, aborting batch: {}", e);
        return Err(e);
      }
    }
  }

  wait_for_completion(&pool, &handles, options.poll_interval).await;

  let results = collect_all(&mut handles, options.progress.as_ref()).await;
  let failed = results.iter().filter(|r| r.is_err()).count();
  info!(pool_name = %pool.name(), item_count, failed, "Batch collected.");

  drop(teardown);
  Ok(results)
}

async fn wait_for_free_slot(pool: &ExecutionPool, interval: Duration) {
  while pool.available_slots() == 0 && !pool.is_closed() {
    trace!(pool_name = %pool.name(), "No free slot; waiting.");
    sleep(interval).await;
  }
}

async fn wait_for_completion<R: Send + 'static>(pool: &ExecutionPool, handles: &[TaskHandle<R>], interval: Duration) {
  loop {
    let summary = StatusSummary::from_records(&poll_status(handles));
    if summary.in_flight() == 0 {
      debug!(pool_name = %pool.name(), completed = summary.completed, failed = summary.failed, "All tasks finished.");
      return;
    }
    trace!(pool_name = %pool.name(), submitted = summary.submitted, running = summary.running, "Waiting for tasks to finish.");
    sleep(interval).await;
  }
}
