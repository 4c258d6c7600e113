use crate::group::TaskGroup;

use std::fmt;
use std::marker::PhantomData;

use tokio::runtime::Handle as TokioHandle;
use tokio_util::sync::CancellationToken;

/// Callback fired once when the group fails or finishes.
pub type CancelCallback = Box<dyn FnOnce() + Send + 'static>;

/// Query for the host parallelism, used to size pools left unconfigured.
pub type ParallelismFn = fn() -> usize;

pub(crate) const DEFAULT_GROUP_NAME: &str = "task_group";

/// Defines which error `join` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
  /// Report the first qualifying failure to complete.
  /// Which one that is depends on completion order, not on submission order.
  #[default]
  FirstError,
  /// Report every qualifying failure, combined in submission order.
  AllErrors,
}

/// Number of logical CPUs, never less than 1.
pub fn default_parallelism() -> usize {
  num_cpus::get().max(1)
}

/// Settings gathered before the group starts.
/// Sizes of 0 mean "not configured" and are resolved on first use.
pub(crate) struct GroupSettings {
  pub(crate) name: String,
  pub(crate) pool_size: usize,
  pub(crate) queue_depth: usize,
  pub(crate) mode: ErrorMode,
  pub(crate) on_cancel: Option<CancelCallback>,
  pub(crate) parallelism: ParallelismFn,
  pub(crate) runtime: Option<TokioHandle>,
}

impl Default for GroupSettings {
  fn default() -> Self {
    Self {
      name: DEFAULT_GROUP_NAME.to_string(),
      pool_size: 0,
      queue_depth: 0,
      mode: ErrorMode::default(),
      on_cancel: None,
      parallelism: default_parallelism,
      runtime: None,
    }
  }
}

impl GroupSettings {
  /// Pool size and queue depth, with unset values replaced by the host parallelism.
  pub(crate) fn resolved_sizes(&self) -> (usize, usize) {
    let fallback = || (self.parallelism)().max(1);
    let pool_size = if self.pool_size > 0 { self.pool_size } else { fallback() };
    let queue_depth = if self.queue_depth > 0 { self.queue_depth } else { fallback() };
    (pool_size, queue_depth)
  }
}

impl fmt::Debug for GroupSettings {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GroupSettings")
      .field("name", &self.name)
      .field("pool_size", &self.pool_size)
      .field("queue_depth", &self.queue_depth)
      .field("mode", &self.mode)
      .field("has_cancel_callback", &self.on_cancel.is_some())
      .field("has_runtime", &self.runtime.is_some())
      .finish()
  }
}

/// Builder for a `TaskGroup`.
///
/// Every setting is optional. Pool size and queue depth default to the host
/// parallelism, resolved when the group starts its workers.
pub struct GroupBuilder<I, M> {
  settings: GroupSettings,
  _marker: PhantomData<fn() -> (I, M)>,
}

impl<I, M> Default for GroupBuilder<I, M> {
  fn default() -> Self {
    Self {
      settings: GroupSettings::default(),
      _marker: PhantomData,
    }
  }
}

impl<I, M> fmt::Debug for GroupBuilder<I, M> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GroupBuilder").field("settings", &self.settings).finish()
  }
}

impl<I, M> GroupBuilder<I, M>
where
  I: fmt::Display + Send + Sync + 'static,
  M: Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Name used in log output.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.settings.name = name.into();
    self
  }

  /// Number of workers. Ignored if 0.
  pub fn pool_size(mut self, size: usize) -> Self {
    if size > 0 {
      self.settings.pool_size = size;
    }
    self
  }

  /// Capacity of the dispatch queue. Ignored if 0.
  pub fn queue_depth(mut self, depth: usize) -> Self {
    if depth > 0 {
      self.settings.queue_depth = depth;
    }
    self
  }

  pub fn mode(mut self, mode: ErrorMode) -> Self {
    self.settings.mode = mode;
    self
  }

  /// Shorthand for `mode(ErrorMode::AllErrors)`.
  pub fn return_all_errors(self) -> Self {
    self.mode(ErrorMode::AllErrors)
  }

  /// Callback fired exactly once: on the first qualifying failure, or when
  /// `join` completes if nothing failed.
  pub fn on_cancel(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
    self.settings.on_cancel = Some(Box::new(callback));
    self
  }

  /// Cancels `token` when the group fails or finishes.
  pub fn cancel_token(self, token: CancellationToken) -> Self {
    self.on_cancel(move || token.cancel())
  }

  /// Overrides the host parallelism query used for unset sizes.
  pub fn parallelism(mut self, query: ParallelismFn) -> Self {
    self.settings.parallelism = query;
    self
  }

  /// Runtime the workers are spawned on. Defaults to the runtime current at first use.
  pub fn runtime(mut self, handle: TokioHandle) -> Self {
    self.settings.runtime = Some(handle);
    self
  }

  pub fn build(self) -> TaskGroup<I, M> {
    TaskGroup::from_settings(self.settings)
  }

  /// Builds a group together with a child of `parent` that is cancelled the
  /// first time a task fails or `join` returns, whichever occurs first.
  pub fn build_with_token(self, parent: &CancellationToken) -> (TaskGroup<I, M>, CancellationToken) {
    let token = parent.child_token();
    let group = self.cancel_token(token.clone()).build();
    (group, token)
  }
}
