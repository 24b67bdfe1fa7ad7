use batch_dispatch::{collect_all, poll_status, Arg, BoxError, ExecutionMode, ExecutionPool, PoolConfig, StatusSummary, TaskContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Manual Pool Example (isolated runtime) ---");

  let pool = ExecutionPool::open_with(PoolConfig::new(3, ExecutionMode::Isolated).with_name("manual")).expect("Pool should open");
  let work = Arc::new(|ctx: TaskContext, args: Vec<u64>| async move {
    ctx.warning(format!("sleeping for {}ms", args[0]));
    tokio::time::sleep(Duration::from_millis(args[0])).await;
    Ok::<u64, BoxError>(args[0])
  });

  let mut handles = Vec::new();
  for delay in [300u64, 100, 200, 50, 150] {
    if pool.available_slots() == 0 {
      info!("Pool is full; task for {}ms will wait for a slot.", delay);
    }
    handles.push(pool.submit(&work, vec![Arg::Single(delay)]).expect("Pool is open"));
  }

  loop {
    let summary = StatusSummary::from_records(&poll_status(&handles));
    info!(
      "submitted={} running={} completed={} failed={}",
      summary.submitted, summary.running, summary.completed, summary.failed
    );
    if summary.in_flight() == 0 {
      break;
    }
    tokio::time::sleep(Duration::from_millis(75)).await;
  }

  for (delay, outcome) in [300u64, 100, 200, 50, 150].iter().zip(collect_all(&mut handles, None).await) {
    info!("Task for {}ms -> {:?}", delay, outcome);
  }

  pool.close();
  info!("--- Manual Pool Example End ---");
}
