//! A Tokio-based bounded-concurrency dispatcher: runs one task per input item
//! across a fixed number of execution slots, then returns every outcome in
//! item order.
//!
//! The pieces can also be used directly: open an [`ExecutionPool`], submit
//! work to get [`TaskHandle`]s, inspect them with [`poll_status`], and gather
//! outcomes with [`TaskHandle::collect`] or [`collect_all`].

mod collect;
mod dispatch;
mod error;
mod handle;
mod pool;
mod status;
mod task;

pub use collect::{collect_all, CollectProgress, ProgressFn};
pub use dispatch::{
  dispatch, resolve_capacity, ArgumentShape, DispatchOptions, PoolOpenHook, DEFAULT_POLL_INTERVAL,
  MAX_DISPATCH_CAPACITY,
};
pub use error::{BoxError, DispatchError};
pub use handle::TaskHandle;
pub use pool::{ExecutionMode, ExecutionPool, PoolConfig, MAX_POOL_CAPACITY, MIN_POOL_CAPACITY};
pub use status::{poll_status, StatusRecord, StatusSummary};
pub use task::{flatten_args, Arg, Diagnostic, DiagnosticLevel, TaskContext, TaskState, WorkFuture, WorkUnit};
