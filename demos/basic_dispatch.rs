use batch_dispatch::{dispatch, Arg, BoxError, CollectProgress, DispatchOptions, ProgressFn, TaskContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::new("info,batch_dispatch=debug"))
    .with_target(false)
    .init();

  info!("--- Basic Dispatch Example ---");

  // Each task receives its item followed by the broadcast exponent and offset.
  let power_plus = |ctx: TaskContext, args: Vec<i64>| async move {
    let (base, exponent, offset) = (args[0], args[1], args[2]);
    tokio::time::sleep(Duration::from_millis(50 * (5 - base as u64))).await;
    if base == 3 {
      ctx.error("3 is not welcome here");
    }
    Ok::<i64, BoxError>(base.pow(exponent as u32) + offset)
  };

  let progress: ProgressFn = Arc::new(|p: CollectProgress| info!("Collected {}/{} ({}%)", p.finished, p.total, p.percent()));

  let options = DispatchOptions::new()
    .capacity(2)
    .broadcast_args(vec![Arg::List(vec![2, 1])])
    .poll_interval(Duration::from_millis(20))
    .progress(progress);

  match dispatch(vec![1, 2, 3, 4], power_plus, options).await {
    Ok(results) => {
      for (position, outcome) in results.iter().enumerate() {
        match outcome {
          Ok(value) => info!("Item {}: {}", position, value),
          Err(e) => info!("Item {} failed: {}", position, e),
        }
      }
    }
    Err(e) => tracing::error!("Dispatch could not run: {}", e),
  }

  info!("--- Basic Dispatch Example End ---");
}
