use crate::config::{ErrorMode, GroupBuilder, GroupSettings};
use crate::error::{BoxError, GroupError};
use crate::gate::FailureGate;
use crate::in_flight::InFlight;
use crate::options::TaskOptions;
use crate::results::TaskResults;
use crate::task::{Task, TaskFn, TaskFuture};
use crate::task_queue::{QueueConsumer, QueueMessage, QueueProducer, TaskQueue};

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, info, info_span, trace, warn, Instrument};

/// State shared between the group and its workers.
struct GroupCore {
  name: Arc<String>,
  mode: ErrorMode,
  in_flight: InFlight,
  gate: FailureGate,
}

/// Resolved once, when the group starts its workers.
struct Dispatch<I, M> {
  producer: Mutex<Option<QueueProducer<I, M>>>,
  pool_size: usize,
  queue_depth: usize,
}

struct GroupShared<I, M> {
  core: Arc<GroupCore>,
  settings: Mutex<GroupSettings>,
  dispatch: OnceLock<Dispatch<I, M>>,
  collected: Mutex<Vec<Arc<Task<I, M>>>>,
}

/// A group of fallible tasks running on a bounded pool of workers.
///
/// Tasks are submitted with [`submit`](TaskGroup::submit) and queued in a
/// bounded FIFO queue; a fixed number of workers execute them. Panics are
/// caught and reported as errors. [`join`](TaskGroup::join) closes the queue,
/// waits for every task and returns the group error according to the
/// configured [`ErrorMode`].
///
/// The handle is cheap to clone; clones refer to the same group. A
/// default-constructed group is ready to use: pool size and queue depth are
/// resolved from the host parallelism when the first task is submitted.
/// A [`detached`](TaskGroup::detached) handle refers to no group at all and
/// every operation on it fails with [`GroupError::Uninitialized`].
pub struct TaskGroup<I, M> {
  inner: Option<Arc<GroupShared<I, M>>>,
}

impl<I, M> Clone for TaskGroup<I, M> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<I, M> fmt::Debug for TaskGroup<I, M> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.inner {
      Some(shared) => f
        .debug_struct("TaskGroup")
        .field("name", &shared.core.name)
        .field("mode", &shared.core.mode)
        .field("in_flight", &shared.core.in_flight.count())
        .field("submitted", &shared.collected.lock().len())
        .field("gate", &shared.core.gate)
        .finish_non_exhaustive(),
      None => f.write_str("TaskGroup(detached)"),
    }
  }
}

impl<I, M> Default for TaskGroup<I, M>
where
  I: fmt::Display + Send + Sync + 'static,
  M: Send + Sync + 'static,
{
  fn default() -> Self {
    Self::from_settings(GroupSettings::default())
  }
}

impl<I, M> TaskGroup<I, M>
where
  I: fmt::Display + Send + Sync + 'static,
  M: Send + Sync + 'static,
{
  /// A group with default settings.
  pub fn new() -> Self {
    Self::default()
  }

  pub fn builder() -> GroupBuilder<I, M> {
    GroupBuilder::new()
  }

  /// A default group together with a child of `parent` that is cancelled the
  /// first time a task fails or `join` returns, whichever occurs first.
  pub fn with_token(parent: &CancellationToken) -> (Self, CancellationToken) {
    GroupBuilder::new().build_with_token(parent)
  }

  /// A handle that is not attached to any group.
  pub fn detached() -> Self {
    Self { inner: None }
  }

  pub(crate) fn from_settings(mut settings: GroupSettings) -> Self {
    let core = Arc::new(GroupCore {
      name: Arc::new(settings.name.clone()),
      mode: settings.mode,
      in_flight: InFlight::default(),
      gate: FailureGate::new(settings.on_cancel.take()),
    });
    Self {
      inner: Some(Arc::new(GroupShared {
        core,
        settings: Mutex::new(settings),
        dispatch: OnceLock::new(),
        collected: Mutex::new(Vec::new()),
      })),
    }
  }

  pub fn is_attached(&self) -> bool {
    self.inner.is_some()
  }

  pub fn name(&self) -> Option<&str> {
    self.inner.as_ref().map(|shared| shared.core.name.as_str())
  }

  pub fn mode(&self) -> Option<ErrorMode> {
    self.inner.as_ref().map(|shared| shared.core.mode)
  }

  /// Number of workers, once the group has started.
  pub fn pool_size(&self) -> Option<usize> {
    let dispatch = self.inner.as_ref()?.dispatch.get()?;
    Some(dispatch.pool_size)
  }

  /// Capacity of the dispatch queue, once the group has started.
  pub fn queue_depth(&self) -> Option<usize> {
    let dispatch = self.inner.as_ref()?.dispatch.get()?;
    Some(dispatch.queue_depth)
  }

  /// Number of submitted tasks that have not completed yet.
  pub fn in_flight(&self) -> usize {
    self.inner.as_ref().map_or(0, |shared| shared.core.in_flight.count())
  }

  /// Returns true once `join` has closed the queue.
  pub fn is_closed(&self) -> bool {
    match self.inner.as_ref().and_then(|shared| shared.dispatch.get()) {
      Some(dispatch) => dispatch.producer.lock().is_none(),
      None => false,
    }
  }

  /// Returns true once cancellation has fired, after the first failure or `join`.
  pub fn is_cancelled(&self) -> bool {
    self.inner.as_ref().is_some_and(|shared| shared.core.gate.is_cancelled())
  }

  /// Submits a task running the future returned by `f`.
  ///
  /// Waits while the queue is full. The task's own failure is only reported
  /// by `join`; this returns an error only if the group rejects the task:
  /// [`GroupError::Closed`] after `join`, [`GroupError::Uninitialized`] on a
  /// detached handle, [`GroupError::RuntimeUnavailable`] if no Tokio runtime
  /// can host the workers.
  pub async fn submit<F, Fut, E>(&self, options: TaskOptions<I, M>, f: F) -> Result<(), GroupError>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
  {
    let run: TaskFn = Box::new(move || {
      Box::pin(async move {
        let result: Result<(), BoxError> = f().await.map_err(Into::into);
        result
      }) as TaskFuture
    });
    self.dispatch_task(options, run).await
  }

  /// Submits a blocking function. It runs on Tokio's blocking thread pool
  /// while occupying one worker of the group.
  pub async fn submit_blocking<F, E>(&self, options: TaskOptions<I, M>, f: F) -> Result<(), GroupError>
  where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
  {
    let run: TaskFn = Box::new(move || {
      Box::pin(async move {
        let result: Result<(), BoxError> = match tokio::task::spawn_blocking(f).await {
          Ok(result) => result.map_err(Into::into),
          Err(join_error) if join_error.is_panic() => std::panic::resume_unwind(join_error.into_panic()),
          Err(join_error) => Err(Box::new(join_error)),
        };
        result
      }) as TaskFuture
    });
    self.dispatch_task(options, run).await
  }

  /// Closes the queue, waits for every submitted task and fires cancellation.
  ///
  /// In [`ErrorMode::FirstError`] returns the first qualifying failure to
  /// complete; in [`ErrorMode::AllErrors`] the combination of every
  /// qualifying failure in submission order. Skipped errors are ignored.
  /// Calling it again returns the same outcome.
  pub async fn join(&self) -> Result<(), GroupError> {
    let shared = self.shared("join")?;
    shared.close_and_drain().await?;
    shared.core.gate.cancel();

    let outcome = match shared.core.mode {
      ErrorMode::FirstError => shared.core.gate.error(),
      ErrorMode::AllErrors => {
        let collected = shared.collected.lock();
        let errors = GroupError::combine(collected.iter().filter(|task| task.failed()).filter_map(|task| task.error()));
        errors
      }
    };

    info!(
      group = %shared.core.name,
      tasks = shared.collected.lock().len(),
      failed = outcome.is_some(),
      "Task group joined."
    );
    match outcome {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  /// Same as [`join`](TaskGroup::join), also returning every submitted task
  /// in submission order. A detached handle returns empty results.
  pub async fn join_and_collect(&self) -> (TaskResults<I, M>, Result<(), GroupError>) {
    let result = self.join().await;
    let tasks = match &self.inner {
      Some(shared) => shared.collected.lock().clone(),
      None => Vec::new(),
    };
    (TaskResults::from(tasks), result)
  }

  fn shared(&self, operation: &str) -> Result<&Arc<GroupShared<I, M>>, GroupError> {
    self.inner.as_ref().ok_or_else(|| {
      warn!(operation, "Operation invoked on a detached task group.");
      GroupError::Uninitialized
    })
  }

  async fn dispatch_task(&self, options: TaskOptions<I, M>, run: TaskFn) -> Result<(), GroupError> {
    let shared = self.shared("submit")?;
    let dispatch = shared.dispatch()?;
    let Some(producer) = dispatch.producer.lock().clone() else {
      warn!(group = %shared.core.name, "Submit: task group is closed.");
      return Err(GroupError::Closed);
    };

    // Nothing is registered while waiting, so dropping this future abandons the task.
    let Some(slot) = producer.reserve().await else {
      error!(group = %shared.core.name, "Submit: workers are gone, task rejected.");
      return Err(GroupError::Closed);
    };

    // Registration happens under the producer lock so that `join` either
    // sees this task in flight or rejects it.
    let task = Arc::new(Task::new(options));
    {
      let guard = dispatch.producer.lock();
      if guard.is_none() {
        warn!(group = %shared.core.name, "Submit: task group closed while waiting for a queue slot.");
        return Err(GroupError::Closed);
      }
      shared.collected.lock().push(task.clone());
      shared.core.in_flight.add();
    }

    debug!(group = %shared.core.name, task = ?task.label(), "Submitting task to queue.");
    slot.send(QueueMessage { task, run });
    Ok(())
  }
}

impl<I, M> GroupShared<I, M>
where
  I: fmt::Display + Send + Sync + 'static,
  M: Send + Sync + 'static,
{
  /// Starts the workers on first use.
  fn dispatch(&self) -> Result<&Dispatch<I, M>, GroupError> {
    if let Some(dispatch) = self.dispatch.get() {
      return Ok(dispatch);
    }

    let settings = self.settings.lock();
    if let Some(dispatch) = self.dispatch.get() {
      return Ok(dispatch);
    }
    let runtime = match settings.runtime.clone() {
      Some(handle) => handle,
      None => TokioHandle::try_current().map_err(|_| {
        error!(group = %self.core.name, "No Tokio runtime available to start workers.");
        GroupError::RuntimeUnavailable
      })?,
    };
    let (pool_size, queue_depth) = settings.resolved_sizes();

    Ok(self.dispatch.get_or_init(|| {
      let (producer, consumer) = TaskQueue::new(queue_depth).split();
      for worker in 0..pool_size {
        runtime.spawn(
          run_worker_loop(self.core.clone(), consumer.clone())
            .instrument(info_span!("task_group_worker", group = %self.core.name, worker)),
        );
      }
      info!(group = %self.core.name, pool_size, queue_depth, "Task group started workers.");
      Dispatch {
        producer: Mutex::new(Some(producer)),
        pool_size,
        queue_depth,
      }
    }))
  }

  /// Closes the queue and waits until every submitted task has completed.
  async fn close_and_drain(&self) -> Result<(), GroupError> {
    let dispatch = self.dispatch()?;
    if dispatch.producer.lock().take().is_some() {
      debug!(group = %self.core.name, in_flight = self.core.in_flight.count(), "Task queue closed. Waiting for in-flight tasks.");
    }
    self.core.in_flight.wait_drained().await;
    Ok(())
  }
}

impl<I, M> Drop for GroupShared<I, M> {
  fn drop(&mut self) {
    if let Some(dispatch) = self.dispatch.get() {
      if dispatch.producer.lock().take().is_some() {
        debug!(
          group = %self.core.name,
          in_flight = self.core.in_flight.count(),
          "Task group dropped without join. Queue closed; queued tasks still run."
        );
      }
    }
  }
}

async fn run_worker_loop<I, M>(core: Arc<GroupCore>, consumer: QueueConsumer<I, M>)
where
  I: fmt::Display + Send + Sync + 'static,
  M: Send + Sync + 'static,
{
  trace!("Worker started.");
  while let Some(QueueMessage { task, run }) = consumer.recv().await {
    // Counts the task as completed even if reporting its outcome unwinds.
    let _completion = core.in_flight.completion();
    if AssertUnwindSafe(process_task(&core, &task, run)).catch_unwind().await.is_err() {
      error!(group = %core.name, "Worker recovered from a panic while reporting a task outcome.");
    }
  }
  trace!("Task queue closed and drained. Worker stopped.");
}

async fn process_task<I, M>(core: &GroupCore, task: &Task<I, M>, run: TaskFn)
where
  I: fmt::Display + Send + Sync + 'static,
  M: Send + Sync + 'static,
{
  let label = task.label();
  trace!(task = ?label, "Dequeued task.");

  let ok = task
    .execute(run)
    .instrument(debug_span!("group_task", task = ?label))
    .await;

  if ok {
    debug!(task = ?label, skipped = task.error_skipped(), "Task completed.");
    return;
  }
  if let Some(err) = task.error() {
    if core.gate.trip(err) {
      info!(group = %core.name, task = ?label, "First task failure latched, group cancelled.");
    } else {
      debug!(task = ?label, "Task failed.");
    }
  }
}
