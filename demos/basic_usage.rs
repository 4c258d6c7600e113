use futures_ensemble::{TaskGroup, TaskOptions};
use std::time::Duration;
use tracing::info;

async fn my_task_fn(id: usize, delay_ms: u64) -> Result<(), std::io::Error> {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  info!("Task {} finished successfully after {}ms", id, delay_ms);
  Ok(())
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let group = TaskGroup::<usize, String>::builder()
    .name("basic_group")
    .pool_size(2) // Concurrency limit
    .queue_depth(10)
    .build();

  for i in 0..5 {
    let task_id: usize = i;
    // Alternate sleep times for variety
    let sleep_duration: u64 = 500 + (i as u64 % 3 * 250);
    let options = TaskOptions::new().id(task_id).with_metadata(format!("sleep={sleep_duration}ms"));
    match group.submit(options, move || my_task_fn(task_id, sleep_duration)).await {
      Ok(()) => info!("Submitted task {}", task_id),
      Err(e) => tracing::error!("Failed to submit task {}: {}", task_id, e),
    }
  }

  info!("All tasks submitted. Joining group...");

  let (results, outcome) = group.join_and_collect().await;
  match outcome {
    Ok(()) => info!("Group finished without errors."),
    Err(e) => info!("Group finished with error: {}", e),
  }
  for task in &results {
    info!("Task {:?} done={} metadata={:?}", task.id(), task.is_done(), task.metadata());
  }
  info!("Successful tasks: {:?}", results.successful().ids());
  info!("--- Basic Usage Example End ---");
}
