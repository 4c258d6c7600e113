use futures_ensemble::{ErrorMode, GroupError, TaskGroup, TaskOptions};
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
enum RecordError {
  #[error("record {0} rejected")]
  Rejected(u32),
  #[error("record ignored")]
  Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
  Succeed,
  Reject,
  Ignore,
  Panic,
}

// Helper to initialize tracing for tests (call once per test run, not per test function)
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,futures_ensemble=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

fn random_plans(count: u32) -> Vec<Plan> {
  let mut rng = rand::rng();
  (0..count)
    .map(|_| match rng.random_range(0..4) {
      0 => Plan::Succeed,
      1 => Plan::Reject,
      2 => Plan::Ignore,
      _ => Plan::Panic,
    })
    .collect()
}

async fn run_plans(mode: ErrorMode, plans: &[Plan]) -> (futures_ensemble::TaskResults<u32, Plan>, Result<(), GroupError>) {
  let group = TaskGroup::<u32, Plan>::builder()
    .name("results_group")
    .pool_size(4)
    .queue_depth(4)
    .mode(mode)
    .build();

  for (i, plan) in plans.iter().copied().enumerate() {
    let id = i as u32;
    let delay = rand::rng().random_range(0..10);
    let options = TaskOptions::new().id(id).with_metadata(plan).skip_error(RecordError::Ignored);
    group
      .submit(options, move || async move {
        sleep(Duration::from_millis(delay)).await;
        match plan {
          Plan::Succeed => Ok(()),
          Plan::Reject => Err(RecordError::Rejected(id)),
          Plan::Ignore => Err(RecordError::Ignored),
          Plan::Panic => panic!("record {id} panicked"),
        }
      })
      .await
      .unwrap();
  }
  group.join_and_collect().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subsets_partition_results() {
  setup_tracing_for_test();
  let plans = random_plans(60);
  let (results, _) = run_plans(ErrorMode::FirstError, &plans).await;
  tracing::info!("Starting test: partition of {} tasks", results.len());

  assert_eq!(results.len(), plans.len());
  assert_eq!(results.metadata().into_iter().copied().collect::<Vec<_>>(), plans);

  let successful: Vec<u32> = results.successful().ids().into_iter().copied().collect();
  let failed: Vec<u32> = results.failed().ids().into_iter().copied().collect();
  let mut merged: Vec<u32> = successful.iter().chain(failed.iter()).copied().collect();
  merged.sort_unstable();
  assert_eq!(merged, (0..plans.len() as u32).collect::<Vec<_>>());

  for id in successful {
    assert!(matches!(plans[id as usize], Plan::Succeed | Plan::Ignore));
  }
  for id in failed {
    assert!(matches!(plans[id as usize], Plan::Reject | Plan::Panic));
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_all_errors_matches_failed_subset() {
  setup_tracing_for_test();
  let plans = vec![Plan::Reject, Plan::Ignore, Plan::Succeed, Plan::Panic, Plan::Reject];
  let (results, outcome) = run_plans(ErrorMode::AllErrors, &plans).await;

  let err = outcome.unwrap_err();
  let reported: Vec<Option<&str>> = err.errors().iter().map(|e| e.task()).collect();
  assert_eq!(reported, vec![Some("0"), Some("3"), Some("4")]);
  assert!(err.errors()[1].is_panic());
  assert!(err.matches(&RecordError::Rejected(4)));
  assert!(!err.matches(&RecordError::Ignored));

  assert_eq!(results.failed().ids(), vec![&0, &3, &4]);
  assert_eq!(results.successful().ids(), vec![&1, &2]);

  // The results error also carries the skipped failure of task 1.
  let all = results.error().unwrap();
  assert_eq!(all.errors().len(), 4);
  assert!(all.matches(&RecordError::Ignored));
  assert_eq!(all.errors()[1].find::<RecordError>(), Some(&RecordError::Ignored));
}

#[tokio::test]
async fn test_task_views_after_join() {
  setup_tracing_for_test();
  let plans = vec![Plan::Ignore, Plan::Reject];
  let (results, outcome) = run_plans(ErrorMode::FirstError, &plans).await;
  assert!(outcome.unwrap_err().matches(&RecordError::Rejected(1)));

  let ignored = results.get(0).unwrap();
  assert!(ignored.is_done());
  assert!(ignored.error_skipped());
  assert!(!ignored.failed());
  assert_eq!(ignored.metadata(), &[Plan::Ignore]);
  let err = ignored.error().unwrap();
  assert_eq!(err.to_string(), "task group: task ID(0): record ignored");
  assert_eq!(err.cause().map(ToString::to_string).as_deref(), Some("record ignored"));

  let rejected = results.get(1).unwrap();
  assert!(rejected.failed());
  assert!(!rejected.error_skipped());
  assert_eq!(rejected.error().unwrap().task(), Some("1"));
}
