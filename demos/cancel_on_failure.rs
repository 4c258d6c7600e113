use futures_ensemble::{TaskGroup, TaskOptions};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum FetchError {
  #[error("shard {0} is unreachable")]
  Unreachable(u32),
  #[error("fetch cancelled")]
  Cancelled,
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Cancel On Failure Example ---");

  let parent = CancellationToken::new();
  let (group, token) = TaskGroup::<u32, ()>::builder()
    .name("fetch_group")
    .pool_size(4)
    .on_cancel(|| info!("Cancellation callback fired."))
    .build_with_token(&parent);

  for shard in 0..4u32 {
    let token = token.clone();
    group
      .submit(TaskOptions::new().id(shard), move || async move {
        if shard == 2 {
          tokio::time::sleep(Duration::from_millis(200)).await;
          return Err(FetchError::Unreachable(shard));
        }
        // Long fetches give up as soon as the group is cancelled.
        tokio::select! {
          _ = token.cancelled() => {
            info!("Shard {} observed cancellation.", shard);
            Err(FetchError::Cancelled)
          }
          _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(()),
        }
      })
      .await
      .expect("Failed to submit fetch");
  }

  match group.join().await {
    Ok(()) => info!("All shards fetched."),
    Err(e) => info!("Fetch failed: {}", e),
  }
  info!("Derived token cancelled: {}, parent cancelled: {}", token.is_cancelled(), parent.is_cancelled());
  info!("--- Cancel On Failure Example End ---");
}
