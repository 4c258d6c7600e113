use std::error::Error as StdError;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error type accepted from task functions.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared, type-erased cause of a task failure.
///
/// Dereferences to the error the task returned, so `GroupError::source()`
/// yields that error itself and `downcast_ref` on it sees its concrete type.
#[derive(Clone)]
pub struct TaskCause(Arc<dyn StdError + Send + Sync + 'static>);

impl TaskCause {
  pub fn new<E: StdError + Send + Sync + 'static>(error: E) -> Self {
    Self(Arc::new(error))
  }
}

impl From<BoxError> for TaskCause {
  fn from(error: BoxError) -> Self {
    Self(Arc::from(error))
  }
}

impl Deref for TaskCause {
  type Target = dyn StdError + Send + Sync + 'static;

  fn deref(&self) -> &Self::Target {
    &*self.0
  }
}

impl fmt::Debug for TaskCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(&*self.0, f)
  }
}

impl fmt::Display for TaskCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&*self.0, f)
  }
}

/// A panic caught inside a task, carrying the panic payload as text.
///
/// This is the source of every `GroupError::Panicked`. Skip rules see it like
/// any returned error, so `skip_kind::<PanicRecovered>()` ignores panics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("panic recovered: {message}")]
pub struct PanicRecovered {
  pub message: String,
}

impl PanicRecovered {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Errors reported by a `TaskGroup` and its tasks.
#[derive(Error, Debug, Clone)]
pub enum GroupError {
  /// A task panicked. The panic was caught inside its worker.
  #[error("task group: panic recovered: {}{}", task_prefix(.task), .panic.message)]
  Panicked {
    task: Option<String>,
    #[source]
    panic: PanicRecovered,
  },

  /// A task returned an error.
  #[error("task group: {}{cause}", task_prefix(.task))]
  Task {
    task: Option<String>,
    #[source]
    cause: TaskCause,
  },

  /// Several task failures, in submission order.
  #[error("{}", join_lines(.0))]
  Aggregate(Vec<GroupError>),

  /// The operation was invoked on a handle that is not attached to a group.
  #[error("task group: panic recovered: group was never initialized")]
  Uninitialized,

  #[error("task group is closed, cannot accept new tasks")]
  Closed,

  #[error("task group: no Tokio runtime available to start workers")]
  RuntimeUnavailable,
}

fn task_prefix(task: &Option<String>) -> String {
  match task {
    Some(id) => format!("task ID({id}): "),
    None => String::new(),
  }
}

fn join_lines(errors: &[GroupError]) -> String {
  errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}

impl GroupError {
  /// Combines errors into one.
  ///
  /// Returns `None` for no errors, the error itself when there is exactly one,
  /// and an `Aggregate` otherwise. Nested aggregates are flattened.
  pub fn combine<T: IntoIterator<Item = GroupError>>(errors: T) -> Option<GroupError> {
    let mut flat: Vec<GroupError> = Vec::new();
    for err in errors {
      match err {
        GroupError::Aggregate(inner) => flat.extend(inner),
        other => flat.push(other),
      }
    }
    match flat.len() {
      0 => None,
      1 => flat.pop(),
      _ => Some(GroupError::Aggregate(flat)),
    }
  }

  /// True for panic-class failures: a recovered panic or an uninitialized group.
  ///
  /// For an aggregate, true if any member is panic-class.
  pub fn is_panic(&self) -> bool {
    match self {
      GroupError::Panicked { .. } | GroupError::Uninitialized => true,
      GroupError::Aggregate(errors) => errors.iter().any(GroupError::is_panic),
      _ => false,
    }
  }

  /// Formatted identifier of the task this error belongs to, if any.
  pub fn task(&self) -> Option<&str> {
    match self {
      GroupError::Panicked { task, .. } | GroupError::Task { task, .. } => task.as_deref(),
      _ => None,
    }
  }

  /// The error returned by the task function, without the identifier wrapping.
  pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
    match self {
      GroupError::Task { cause, .. } => Some(&**cause),
      _ => None,
    }
  }

  /// The individual errors: the members of an aggregate, or `self` alone.
  pub fn errors(&self) -> Vec<&GroupError> {
    match self {
      GroupError::Aggregate(errors) => errors.iter().flat_map(GroupError::errors).collect(),
      other => vec![other],
    }
  }

  /// Finds the first error of type `E` in the `source()` chain of any member.
  pub fn find<E: StdError + 'static>(&self) -> Option<&E> {
    self
      .errors()
      .into_iter()
      .find_map(|err| StdError::source(err).and_then(find_in_chain::<E>))
  }

  /// Returns true if `target` equals an error in the `source()` chain of any
  /// member: the task cause, anything it wraps, or a recovered panic.
  pub fn matches<E: StdError + PartialEq + 'static>(&self, target: &E) -> bool {
    self
      .errors()
      .into_iter()
      .any(|err| StdError::source(err).is_some_and(|source| chain_matches(source, target)))
  }
}

/// Walks `err` and its `source()` chain looking for a value of type `E`.
pub(crate) fn find_in_chain<'a, E: StdError + 'static>(
  err: &'a (dyn StdError + 'static),
) -> Option<&'a E> {
  let mut current: Option<&(dyn StdError + 'static)> = Some(err);
  while let Some(e) = current {
    if let Some(found) = e.downcast_ref::<E>() {
      return Some(found);
    }
    current = e.source();
  }
  None
}

/// Returns true if some link of the chain starting at `err` is an `E` equal to `target`.
pub(crate) fn chain_matches<E: StdError + PartialEq + 'static>(
  err: &(dyn StdError + 'static),
  target: &E,
) -> bool {
  let mut current: Option<&(dyn StdError + 'static)> = Some(err);
  while let Some(e) = current {
    if e.downcast_ref::<E>().is_some_and(|found| found == target) {
      return true;
    }
    current = e.source();
  }
  false
}
