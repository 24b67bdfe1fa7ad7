use batch_dispatch::{Arg, BoxError, ExecutionMode, ExecutionPool, TaskContext, TaskHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

async fn long_task_fn(id: usize) -> String {
  info!("Task {} starting (concurrency test - should take 1s)", id);
  tokio::time::sleep(Duration::from_secs(1)).await;
  let result = format!("Task {} finished", id);
  info!("{}", result);
  result
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Limit: 2) ---");

  let concurrency_limit = 2;
  let pool = ExecutionPool::open(concurrency_limit, ExecutionMode::Shared).expect("Pool should open");
  let work = Arc::new(|_ctx: TaskContext, args: Vec<usize>| async move { Ok::<String, BoxError>(long_task_fn(args[0]).await) });

  let num_tasks = 5;
  let mut handles: Vec<TaskHandle<String>> = Vec::new();

  info!(
    "Submitting {} tasks, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_tasks,
    concurrency_limit,
    (num_tasks as f32 / concurrency_limit as f32).ceil()
  );

  let started = Instant::now();
  for i in 0..num_tasks {
    match pool.submit(&work, vec![Arg::Single(i)]) {
      Ok(handle) => handles.push(handle),
      Err(e) => tracing::error!("Failed to submit task {}: {:?}", i, e),
    }
    info!("Free slots after submitting task {}: {}", i, pool.available_slots());
  }

  for handle in handles.iter_mut() {
    let task_id = handle.id();
    match handle.collect().await {
      Ok(result) => info!("Task {} main: Received result: {}", task_id, result),
      Err(e) => info!("Task {} main: Received error: {:?}", task_id, e),
    }
  }

  info!("All tasks processed in {:?}. Closing pool.", started.elapsed());
  pool.close();
  info!("--- Concurrency Limit Example End ---");
}
