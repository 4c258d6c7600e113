use crate::error::GroupError;
use crate::task::Task;

use std::fmt;
use std::sync::Arc;

/// The tasks of a group, in submission order.
///
/// Returned by `TaskGroup::join_and_collect`. Every view preserves the
/// relative order of the tasks.
pub struct TaskResults<I, M> {
  tasks: Vec<Arc<Task<I, M>>>,
}

impl<I, M> Default for TaskResults<I, M> {
  fn default() -> Self {
    Self { tasks: Vec::new() }
  }
}

impl<I, M> Clone for TaskResults<I, M> {
  fn clone(&self) -> Self {
    Self {
      tasks: self.tasks.clone(),
    }
  }
}

impl<I: fmt::Debug, M: fmt::Debug> fmt::Debug for TaskResults<I, M> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.tasks.iter()).finish()
  }
}

impl<I, M> From<Vec<Arc<Task<I, M>>>> for TaskResults<I, M> {
  fn from(tasks: Vec<Arc<Task<I, M>>>) -> Self {
    Self { tasks }
  }
}

impl<I, M> TaskResults<I, M> {
  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Task<I, M>> + '_ {
    self.tasks.iter().map(|task| &**task)
  }

  pub fn get(&self, index: usize) -> Option<&Task<I, M>> {
    self.tasks.get(index).map(|task| &**task)
  }

  /// Identifiers of the tasks. Tasks without an identifier are left out.
  pub fn ids(&self) -> Vec<&I> {
    self.tasks.iter().filter_map(|task| task.id()).collect()
  }

  /// Metadata of every task, flattened in task order.
  pub fn metadata(&self) -> Vec<&M> {
    self.tasks.iter().flat_map(|task| task.metadata().iter()).collect()
  }

  /// Tasks that did not fail. Tasks whose error was skipped count as successful.
  pub fn successful(&self) -> TaskResults<I, M> {
    self.filter(|task| !task.failed())
  }

  /// Tasks that failed with an error that is not skipped.
  pub fn failed(&self) -> TaskResults<I, M> {
    self.filter(Task::failed)
  }

  fn filter(&self, keep: impl Fn(&Task<I, M>) -> bool) -> TaskResults<I, M> {
    let tasks = self.tasks.iter().filter(|task| keep(task)).cloned().collect();
    TaskResults { tasks }
  }
}

impl<I: fmt::Display, M> TaskResults<I, M> {
  /// Every stored task error, skipped ones included, combined in task order.
  pub fn error(&self) -> Option<GroupError> {
    GroupError::combine(self.tasks.iter().filter_map(|task| task.error()))
  }
}

impl<'a, I, M> IntoIterator for &'a TaskResults<I, M> {
  type Item = &'a Task<I, M>;
  type IntoIter = Box<dyn Iterator<Item = &'a Task<I, M>> + 'a>;

  fn into_iter(self) -> Self::IntoIter {
    Box::new(self.iter())
  }
}
