use futures_ensemble::{GroupError, TaskGroup, TaskOptions};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let group = TaskGroup::<&'static str, ()>::builder()
    .name("panic_group")
    .pool_size(1)
    .queue_depth(5)
    .build();

  group
    .submit(TaskOptions::new().id("panicking"), || async {
      info!("Panicking Task: Starting...");
      tokio::time::sleep(Duration::from_millis(100)).await;
      info!("Panicking Task: About to panic!");
      panic!("This task is designed to panic!");
      #[allow(unreachable_code)]
      Ok::<(), std::io::Error>(())
    })
    .await
    .expect("Failed to submit panicking task");

  group
    .submit(TaskOptions::new().id("survivor"), || async {
      info!("Survivor Task: the worker is still alive.");
      Ok::<(), std::io::Error>(())
    })
    .await
    .expect("Failed to submit survivor task");

  info!("Tasks submitted. Joining group...");

  let (results, outcome) = group.join_and_collect().await;
  match outcome {
    Ok(()) => info!("Group completed with UNEXPECTED success."),
    Err(e @ GroupError::Panicked { .. }) => info!("Group correctly reported the panic: {}", e),
    Err(e) => info!("Group resulted in unexpected error: {:?}", e),
  }
  info!("Failed: {:?}, successful: {:?}", results.failed().ids(), results.successful().ids());
  info!("--- Task Panic Example End ---");
}
