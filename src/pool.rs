use crate::error::DispatchError;
use crate::handle::TaskHandle;
use crate::task::{flatten_args, Arg, TaskContext, TaskShared, TaskState, WorkUnit};

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::{Builder as RuntimeBuilder, Handle as TokioHandle, Runtime};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Smallest capacity a pool accepts.
pub const MIN_POOL_CAPACITY: usize = 1;
/// Largest capacity a pool accepts.
pub const MAX_POOL_CAPACITY: usize = 64;

/// Selects where a pool's tasks execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
  /// Tasks run on a dedicated multi-thread runtime owned by the pool, with
  /// one worker thread per slot. The runtime is shut down when the pool closes.
  Isolated,
  /// Tasks run on the Tokio runtime that was current when the pool was opened.
  #[default]
  Shared,
}

/// Immutable settings for an `ExecutionPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  pub capacity: usize,
  pub mode: ExecutionMode,
  pub name: String,
}

impl PoolConfig {
  pub fn new(capacity: usize, mode: ExecutionMode) -> Self {
    Self {
      capacity,
      mode,
      name: "execution_pool".to_string(),
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }
}

enum Spawner {
  Shared(TokioHandle),
  Isolated(Mutex<Option<Runtime>>),
}

impl Spawner {
  fn spawn<F>(&self, future: F) -> Result<(), DispatchError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    match self {
      Spawner::Shared(handle) => {
        handle.spawn(future);
        Ok(())
      }
      Spawner::Isolated(runtime) => match runtime.lock().as_ref() {
        Some(rt) => {
          rt.spawn(future);
          Ok(())
        }
        None => Err(DispatchError::SubmissionFailed(
          "isolated runtime has already been shut down".to_string(),
        )),
      },
    }
  }

  fn shutdown(&self) {
    if let Spawner::Isolated(runtime) = self {
      if let Some(rt) = runtime.lock().take() {
        rt.shutdown_background();
      }
    }
  }
}

/// Settles a task when its future ends, including when the runtime drops it
/// mid-flight. A task that never reported an outcome is marked `Failed`, leaves
/// the running set, and its handle receives `PoolClosed`.
struct TaskExitGuard<R: Send + 'static> {
  pool_name: Arc<String>,
  shared: Arc<TaskShared>,
  running_task_info: Arc<DashMap<u64, Arc<TaskShared>>>,
  result_tx: Option<fibre::oneshot::Sender<Result<R, DispatchError>>>,
}

impl<R: Send + 'static> TaskExitGuard<R> {
  fn report(&mut self, outcome: Result<R, DispatchError>) {
    let task_id = self.shared.task_id;
    self.running_task_info.remove(&task_id);
    if let Some(tx) = self.result_tx.take() {
      if tx.send(outcome).is_err() {
        warn!(pool_name = %*self.pool_name, %task_id, "Task handle was dropped. Task outcome has been discarded.");
      }
    }
  }
}

impl<R: Send + 'static> Drop for TaskExitGuard<R> {
  fn drop(&mut self) {
    let task_id = self.shared.task_id;
    self.running_task_info.remove(&task_id);
    if let Some(tx) = self.result_tx.take() {
      self.shared.advance(TaskState::Failed);
      debug!(pool_name = %*self.pool_name, %task_id, "Task abandoned before finishing; reporting closed pool.");
      let _ = tx.send(Err(DispatchError::PoolClosed));
    }
  }
}

/// A bounded set of execution slots.
///
/// Admission is capacity based: a task holds one slot while it runs and the
/// pool never buffers work beyond what callers have already submitted. Callers
/// that want backpressure check `available_slots` before submitting, as the
/// dispatcher does.
pub struct ExecutionPool {
  pool_name: Arc<String>,
  capacity: usize,
  mode: ExecutionMode,
  semaphore: Arc<Semaphore>,
  spawner: Spawner,
  running_task_info: Arc<DashMap<u64, Arc<TaskShared>>>,
  shutdown_token: CancellationToken,
  close_count: AtomicUsize,
}

impl std::fmt::Debug for ExecutionPool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExecutionPool")
      .field("name", &self.pool_name)
      .field("capacity", &self.capacity)
      .field("mode", &self.mode)
      .field("available_slots", &self.available_slots())
      .field("closed", &self.is_closed())
      .finish_non_exhaustive()
  }
}

impl ExecutionPool {
  /// Opens a pool with `capacity` slots in `mode`.
  ///
  /// # Errors
  /// Returns `DispatchError::InvalidCapacity` if `capacity` is outside `1..=64`.
  /// Returns `DispatchError::RuntimeUnavailable` if a shared pool is opened
  /// outside a Tokio runtime, or an isolated runtime cannot be built.
  pub fn open(capacity: usize, mode: ExecutionMode) -> Result<Arc<Self>, DispatchError> {
    Self::open_with(PoolConfig::new(capacity, mode))
  }

  pub fn open_with(config: PoolConfig) -> Result<Arc<Self>, DispatchError> {
    if !(MIN_POOL_CAPACITY..=MAX_POOL_CAPACITY).contains(&config.capacity) {
      warn!(pool_name = %config.name, capacity = config.capacity, "Open: Rejected pool capacity.");
      return Err(DispatchError::InvalidCapacity {
        requested: config.capacity,
        max: MAX_POOL_CAPACITY,
      });
    }

    let spawner = match config.mode {
      ExecutionMode::Shared => {
        let handle = TokioHandle::try_current().map_err(|e| DispatchError::RuntimeUnavailable(e.to_string()))?;
        Spawner::Shared(handle)
      }
      ExecutionMode::Isolated => {
        let runtime = RuntimeBuilder::new_multi_thread()
          .worker_threads(config.capacity)
          .thread_name(format!("{}-worker", config.name))
          .enable_all()
          .build()
          .map_err(|e| DispatchError::RuntimeUnavailable(e.to_string()))?;
        Spawner::Isolated(Mutex::new(Some(runtime)))
      }
    };

    info!(pool_name = %config.name, capacity = config.capacity, mode = ?config.mode, "Execution pool opened.");

    Ok(Arc::new(Self {
      pool_name: Arc::new(config.name),
      capacity: config.capacity,
      mode: config.mode,
      semaphore: Arc::new(Semaphore::new(config.capacity)),
      spawner,
      running_task_info: Arc::new(DashMap::new()),
      shutdown_token: CancellationToken::new(),
      close_count: AtomicUsize::new(0),
    }))
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn mode(&self) -> ExecutionMode {
    self.mode
  }

  /// Number of free slots right now. Never exceeds `capacity`.
  pub fn available_slots(&self) -> usize {
    self.semaphore.available_permits()
  }

  /// Number of tasks currently holding a slot.
  pub fn running_task_count(&self) -> usize {
    self.running_task_info.len()
  }

  pub fn is_closed(&self) -> bool {
    self.shutdown_token.is_cancelled()
  }

  /// How many times this pool was effectively closed (0 or 1).
  pub fn close_count(&self) -> usize {
    self.close_count.load(AtomicOrdering::Acquire)
  }

  /// Schedules one instance of `work` with `args` and returns immediately.
  ///
  /// If a slot is free it is claimed before this call returns. Otherwise the
  /// task stays `Submitted` until a slot frees up. `Arg::List` entries are
  /// flattened into individual positional arguments.
  ///
  /// # Errors
  /// Returns `DispatchError::PoolClosed` if the pool has been closed.
  /// Returns `DispatchError::SubmissionFailed` if the runtime refused the task.
  pub fn submit<A, R, W>(&self, work: &Arc<W>, args: Vec<Arg<A>>) -> Result<TaskHandle<R>, DispatchError>
  where
    A: Send + 'static,
    R: Send + 'static,
    W: WorkUnit<A, R>,
  {
    if self.is_closed() {
      warn!(pool_name = %self.pool_name, "Submit: Attempted to submit task to a closed pool.");
      return Err(DispatchError::PoolClosed);
    }

    let initial_permit = match self.semaphore.clone().try_acquire_owned() {
      Ok(permit) => Some(permit),
      Err(TryAcquireError::NoPermits) => None,
      Err(TryAcquireError::Closed) => return Err(DispatchError::PoolClosed),
    };

    let task_id = NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let shared = TaskShared::new(task_id);
    let (result_tx, result_rx) = fibre::oneshot::oneshot::<Result<R, DispatchError>>();
    let positional = flatten_args(args);
    let slot_claimed = initial_permit.is_some();

    if slot_claimed {
      shared.advance(TaskState::Running);
      self.running_task_info.insert(task_id, shared.clone());
    }

    debug!(pool_name = %self.pool_name, %task_id, arg_count = positional.len(), slot_claimed, "Submitting task.");

    // Built outside the async body so it settles the task even if the future is never polled.
    let exit_guard = TaskExitGuard {
      pool_name: self.pool_name.clone(),
      shared: shared.clone(),
      running_task_info: self.running_task_info.clone(),
      result_tx: Some(result_tx),
    };

    let task_future = Self::run_task(
      self.pool_name.clone(),
      self.semaphore.clone(),
      initial_permit,
      exit_guard,
      work.clone(),
      positional,
    )
    .instrument(info_span!("dispatched_task", pool_name = %*self.pool_name, %task_id));

    if let Err(e) = self.spawner.spawn(task_future) {
      // The future was dropped unspawned; its permit and exit guard went with it.
      error!(pool_name = %self.pool_name, %task_id, "Submit: Runtime refused task: {}", e);
      return Err(e);
    }

    Ok(TaskHandle::new(shared, result_rx))
  }

  async fn run_task<A, R, W>(
    pool_name: Arc<String>,
    semaphore: Arc<Semaphore>,
    initial_permit: Option<OwnedSemaphorePermit>,
    mut exit_guard: TaskExitGuard<R>,
    work: Arc<W>,
    positional: Vec<A>,
  ) where
    A: Send + 'static,
    R: Send + 'static,
    W: WorkUnit<A, R>,
  {
    let shared = exit_guard.shared.clone();
    let task_id = shared.task_id;

    let _slot_guard = match initial_permit {
      Some(permit) => permit,
      None => match semaphore.acquire_owned().await {
        Ok(permit) => {
          shared.advance(TaskState::Running);
          exit_guard.running_task_info.insert(task_id, shared.clone());
          trace!(pool_name = %*pool_name, %task_id, "Acquired slot after waiting.");
          permit
        }
        Err(_) => {
          debug!(pool_name = %*pool_name, %task_id, "Pool closed before task obtained a slot.");
          shared.advance(TaskState::Failed);
          exit_guard.report(Err(DispatchError::PoolClosed));
          return;
        }
      },
    };

    let ctx = TaskContext { shared: shared.clone() };
    let execution = AssertUnwindSafe(async move { work.run(ctx, positional).await }).catch_unwind().await;

    let outcome: Result<R, DispatchError> = match execution {
      Ok(Ok(value)) => {
        trace!(pool_name = %*pool_name, %task_id, "Task returned normally.");
        Ok(value)
      }
      Ok(Err(work_error)) => {
        debug!(pool_name = %*pool_name, %task_id, "Task returned an error: {}", work_error);
        Err(DispatchError::TaskExecution {
          task_id,
          messages: vec![work_error.to_string()],
        })
      }
      Err(_panic_payload) => {
        error!(pool_name = %*pool_name, %task_id, "Task panicked during execution.");
        Err(DispatchError::TaskPanicked)
      }
    };

    let terminal = if shared.has_errors() {
      TaskState::Failed
    } else {
      TaskState::from(&outcome)
    };
    shared.advance(terminal);
    exit_guard.report(outcome);
    debug!(pool_name = %*pool_name, %task_id, state = ?terminal, "Task finished, releasing slot.");
  }

  /// Closes the pool. Returns `true` if this call performed the close.
  ///
  /// Tasks already holding a slot keep running on a shared pool. Tasks still
  /// waiting for a slot fail with `PoolClosed`. An isolated pool's runtime is
  /// shut down: its in-flight tasks are dropped and end up `Failed` with
  /// `PoolClosed`.
  pub fn close(&self) -> bool {
    if self
      .close_count
      .compare_exchange(0, 1, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
      .is_err()
    {
      trace!(pool_name = %self.pool_name, "Close: Pool already closed.");
      return false;
    }
    self.shutdown_token.cancel();
    self.semaphore.close();
    self.spawner.shutdown();

    let still_running = self.running_task_info.len();
    if still_running > 0 {
      warn!(pool_name = %self.pool_name, still_running, "Pool closed while tasks still hold slots.");
    }
    info!(pool_name = %self.pool_name, "Execution pool closed.");
    true
  }
}

impl Drop for ExecutionPool {
  fn drop(&mut self) {
    if self.close_count() == 0 {
      info!(pool_name = %*self.pool_name, "ExecutionPool dropped without explicit close. Closing implicitly.");
      self.close();
    }
  }
}
