use crate::error::{chain_matches, find_in_chain};

use std::error::Error as StdError;
use std::fmt;

/// Predicate deciding whether a task error is ignored by the group.
pub(crate) type SkipRule = Box<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static>;

/// Per-task options: identifier, metadata and errors to skip.
///
/// ```
/// use futures_ensemble::TaskOptions;
///
/// let options = TaskOptions::<u32, &str>::new()
///   .id(7)
///   .metadata(["shard-a", "retryable"])
///   .skip_kind::<std::io::Error>();
/// ```
pub struct TaskOptions<I, M> {
  pub(crate) id: Option<I>,
  pub(crate) metadata: Vec<M>,
  pub(crate) skip: Vec<SkipRule>,
}

impl<I, M> Default for TaskOptions<I, M> {
  fn default() -> Self {
    Self {
      id: None,
      metadata: Vec::new(),
      skip: Vec::new(),
    }
  }
}

impl<I: fmt::Debug, M: fmt::Debug> fmt::Debug for TaskOptions<I, M> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskOptions")
      .field("id", &self.id)
      .field("metadata", &self.metadata)
      .field("skip_rules", &self.skip.len())
      .finish()
  }
}

impl<I, M> TaskOptions<I, M> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the task identifier.
  pub fn id(mut self, id: I) -> Self {
    self.id = Some(id);
    self
  }

  /// Appends metadata. Repeated calls accumulate.
  pub fn metadata<T: IntoIterator<Item = M>>(mut self, metadata: T) -> Self {
    self.metadata.extend(metadata);
    self
  }

  /// Appends a single metadata value.
  pub fn with_metadata(mut self, value: M) -> Self {
    self.metadata.push(value);
    self
  }

  /// Ignores failures equal to `sentinel`, either returned directly or
  /// found in the returned error's `source()` chain.
  pub fn skip_error<E>(self, sentinel: E) -> Self
  where
    E: StdError + PartialEq + Send + Sync + 'static,
  {
    self.skip_when(move |err| chain_matches(err, &sentinel))
  }

  /// Ignores failures of type `E` anywhere in the returned error's chain.
  pub fn skip_kind<E: StdError + 'static>(self) -> Self {
    self.skip_when(|err| find_in_chain::<E>(err).is_some())
  }

  /// Ignores failures for which `predicate` returns true.
  pub fn skip_when<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
  {
    self.skip.push(Box::new(predicate));
    self
  }
}
