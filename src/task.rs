use crate::error::{BoxError, GroupError, PanicRecovered, TaskCause};
use crate::options::{SkipRule, TaskOptions};

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::OnceLock;

use futures::FutureExt;
use tracing::{error, trace, warn};

/// The future a task runs. It must be `Send` and `'static`.
pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'static>>;

/// The zero-argument function of a task. It is called on a worker, so a
/// panic while building the future is caught like a panic while polling it.
pub(crate) type TaskFn = Box<dyn FnOnce() -> TaskFuture + Send + 'static>;

/// What a finished task produced.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
  Succeeded,
  Failed(TaskCause),
  Panicked(PanicRecovered),
}

/// One unit of work submitted to a `TaskGroup`.
///
/// The outcome is written exactly once, by the worker that ran the task.
/// After `join` returns every task of the group has one.
pub struct Task<I, M> {
  id: Option<I>,
  metadata: Vec<M>,
  skip: Vec<SkipRule>,
  outcome: OnceLock<Outcome>,
}

impl<I: fmt::Debug, M: fmt::Debug> fmt::Debug for Task<I, M> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task")
      .field("id", &self.id)
      .field("metadata", &self.metadata)
      .field("skip_rules", &self.skip.len())
      .field("outcome", &self.outcome.get())
      .finish()
  }
}

impl<I, M> Task<I, M> {
  pub(crate) fn new(options: TaskOptions<I, M>) -> Self {
    Self {
      id: options.id,
      metadata: options.metadata,
      skip: options.skip,
      outcome: OnceLock::new(),
    }
  }

  pub fn id(&self) -> Option<&I> {
    self.id.as_ref()
  }

  pub fn metadata(&self) -> &[M] {
    &self.metadata
  }

  /// Returns true once a worker has recorded the outcome.
  pub fn is_done(&self) -> bool {
    self.outcome.get().is_some()
  }

  /// Returns true if the task failed and the failure matches one of its skip rules.
  ///
  /// A recovered panic is matched as a [`PanicRecovered`] error.
  pub fn error_skipped(&self) -> bool {
    let error: &(dyn StdError + 'static) = match self.outcome.get() {
      Some(Outcome::Failed(cause)) => &**cause,
      Some(Outcome::Panicked(panic)) => panic,
      _ => return false,
    };
    self.skip.iter().any(|rule| rule(error))
  }

  /// Returns true if the task produced an error that is not skipped.
  pub fn failed(&self) -> bool {
    match self.outcome.get() {
      Some(Outcome::Failed(_)) | Some(Outcome::Panicked(_)) => !self.error_skipped(),
      _ => false,
    }
  }

  /// Records the outcome. Only the first write is kept.
  pub(crate) fn record(&self, outcome: Outcome) {
    if self.outcome.set(outcome).is_err() {
      warn!("Task outcome already recorded, ignoring second write.");
    }
  }
}

impl<I: fmt::Display, M> Task<I, M> {
  /// The identifier formatted for errors and logs.
  ///
  /// `None` without an identifier, or if formatting it panics.
  pub(crate) fn label(&self) -> Option<String> {
    let id = self.id.as_ref()?;
    match catch_unwind(AssertUnwindSafe(|| id.to_string())) {
      Ok(label) => Some(label),
      Err(_) => {
        warn!("Formatting a task identifier panicked, leaving it out.");
        None
      }
    }
  }

  /// The task error wrapped with the task identifier, skipped or not.
  pub fn error(&self) -> Option<GroupError> {
    let task = self.label();
    match self.outcome.get()? {
      Outcome::Succeeded => None,
      Outcome::Failed(cause) => Some(GroupError::Task {
        task,
        cause: cause.clone(),
      }),
      Outcome::Panicked(panic) => Some(GroupError::Panicked {
        task,
        panic: panic.clone(),
      }),
    }
  }

  /// Runs the task function, catching panics, and records the outcome.
  ///
  /// Returns true unless the task failed with an error that is not skipped.
  pub(crate) async fn execute(&self, run: TaskFn) -> bool {
    let result = AssertUnwindSafe(async move { run().await }).catch_unwind().await;
    let outcome = match result {
      Ok(Ok(())) => {
        trace!("Task executed successfully.");
        Outcome::Succeeded
      }
      Ok(Err(err)) => Outcome::Failed(TaskCause::from(err)),
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        error!(%message, "Task panicked during execution.");
        Outcome::Panicked(PanicRecovered::new(message))
      }
    };
    self.record(outcome);
    !self.failed()
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io;

  #[derive(Debug, PartialEq)]
  struct Sentinel;

  impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("sentinel")
    }
  }

  impl StdError for Sentinel {}

  fn work<F>(fut: F) -> TaskFn
  where
    F: Future<Output = Result<(), BoxError>> + Send + 'static,
  {
    Box::new(move || Box::pin(fut) as TaskFuture)
  }

  #[tokio::test]
  async fn test_execute_success() {
    let task = Task::<u32, ()>::new(TaskOptions::new().id(1));
    assert!(!task.is_done());
    assert!(task.execute(work(async { Ok(()) })).await);
    assert!(task.is_done());
    assert!(!task.failed());
    assert!(task.error().is_none());
  }

  #[tokio::test]
  async fn test_execute_error_is_wrapped_with_id() {
    let task = Task::<u32, ()>::new(TaskOptions::new().id(2));
    let ok = task.execute(work(async { Err(Box::new(Sentinel) as BoxError) })).await;
    assert!(!ok);
    assert!(task.failed());
    let err = task.error().unwrap();
    assert_eq!(err.to_string(), "task group: task ID(2): sentinel");
    assert!(err.matches(&Sentinel));
  }

  #[tokio::test]
  async fn test_execute_catches_panic_in_future() {
    let task = Task::<&str, ()>::new(TaskOptions::new().id("p"));
    let ok = task
      .execute(work(async {
        panic!("kaboom");
        #[allow(unreachable_code)]
        Ok(())
      }))
      .await;
    assert!(!ok);
    let err = task.error().unwrap();
    assert!(err.is_panic());
    assert!(err.to_string().contains("task ID(p)"));
    assert!(err.to_string().contains("kaboom"));
  }

  #[tokio::test]
  async fn test_execute_catches_panic_in_function() {
    let task = Task::<u8, ()>::new(TaskOptions::new());
    let run: TaskFn = Box::new(|| -> TaskFuture { panic!("before the future") });
    assert!(!task.execute(run).await);
    assert!(task.error().unwrap().is_panic());
  }

  #[tokio::test]
  async fn test_skipped_error() {
    let task = Task::<u8, ()>::new(TaskOptions::new().skip_error(Sentinel));
    let ok = task.execute(work(async { Err(Box::new(Sentinel) as BoxError) })).await;
    assert!(ok);
    assert!(task.error_skipped());
    assert!(!task.failed());
    // The skipped error stays available.
    assert!(task.error().unwrap().matches(&Sentinel));
  }

  #[tokio::test]
  async fn test_skip_does_not_match_other_errors() {
    let task = Task::<u8, ()>::new(TaskOptions::new().skip_error(Sentinel));
    let ok = task
      .execute(work(async {
        Err(Box::new(io::Error::new(io::ErrorKind::Other, "io")) as BoxError)
      }))
      .await;
    assert!(!ok);
    assert!(!task.error_skipped());
    assert!(task.failed());
  }

  #[test]
  fn test_outcome_is_written_once() {
    let task = Task::<u8, ()>::new(TaskOptions::new());
    task.record(Outcome::Succeeded);
    task.record(Outcome::Panicked(PanicRecovered::new("late")));
    assert!(!task.failed());
    assert!(!task.error_skipped());
  }

  #[tokio::test]
  async fn test_panic_can_be_skipped() {
    let task = Task::<u8, ()>::new(TaskOptions::new().id(3).skip_kind::<PanicRecovered>());
    let ok = task
      .execute(work(async {
        panic!("expected");
        #[allow(unreachable_code)]
        Ok(())
      }))
      .await;
    assert!(ok);
    assert!(task.error_skipped());
    assert!(!task.failed());
    let err = task.error().unwrap();
    assert!(err.is_panic());
    assert!(err.matches(&PanicRecovered::new("expected")));
  }

  struct Unprintable;

  impl fmt::Display for Unprintable {
    fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
      panic!("identifier cannot be displayed");
    }
  }

  #[tokio::test]
  async fn test_label_survives_panicking_display() {
    let task = Task::<Unprintable, ()>::new(TaskOptions::new().id(Unprintable));
    assert_eq!(task.label(), None);
    assert!(!task.execute(work(async { Err(Box::new(Sentinel) as BoxError) })).await);
    let err = task.error().unwrap();
    assert_eq!(err.task(), None);
    assert_eq!(err.to_string(), "task group: sentinel");
  }
}
