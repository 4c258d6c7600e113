use futures_ensemble::{ErrorMode, TaskGroup, TaskOptions};
use std::time::Duration;
use tracing::info;

#[derive(Debug, PartialEq, thiserror::Error)]
enum JobError {
  #[error("record {0} is invalid")]
  Invalid(u32),
  #[error("record already imported")]
  Duplicate,
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- All Errors Example ---");

  let group = TaskGroup::<u32, &'static str>::builder()
    .name("import_group")
    .pool_size(3)
    .mode(ErrorMode::AllErrors)
    .build();

  for record in 0..9u32 {
    // Duplicates are expected and do not count as failures.
    let options = TaskOptions::new()
      .id(record)
      .with_metadata("import")
      .skip_error(JobError::Duplicate);
    group
      .submit(options, move || async move {
        tokio::time::sleep(Duration::from_millis(50 * u64::from(9 - record))).await;
        match record % 4 {
          1 => Err(JobError::Invalid(record)),
          3 => Err(JobError::Duplicate),
          _ => Ok(()),
        }
      })
      .await
      .expect("Failed to submit import");
  }

  let (results, outcome) = group.join_and_collect().await;
  if let Err(e) = outcome {
    info!("{} records failed:\n{}", e.errors().len(), e);
  }
  info!("Imported: {:?}", results.successful().ids());
  info!("Rejected: {:?}", results.failed().ids());
  info!("--- All Errors Example End ---");
}
