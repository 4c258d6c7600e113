use crate::task::{Task, TaskFn};

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// A task travelling through the dispatch queue, paired with the function
/// that runs it.
pub(crate) struct QueueMessage<I, M> {
  pub(crate) task: Arc<Task<I, M>>,
  pub(crate) run: TaskFn,
}

impl<I: fmt::Debug, M: fmt::Debug> fmt::Debug for QueueMessage<I, M> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueMessage")
      .field("task", &self.task)
      .finish_non_exhaustive()
  }
}

/// A bounded, multi-producer, multi-consumer FIFO queue of tasks.
///
/// Capacity is enforced by the underlying bounded channel, so a producer
/// waits while the queue is full. Consumers share the receiving half behind
/// an async mutex; each message is delivered to exactly one of them.
///
/// Only the consumer holding the mutex waits on the channel, the other idle
/// workers wait on the mutex. Workers spend their time running tasks rather
/// than receiving, so this costs one extra lock hand-off per task.
pub(crate) struct TaskQueue<I, M> {
  tx: mpsc::Sender<QueueMessage<I, M>>,
  rx: mpsc::Receiver<QueueMessage<I, M>>,
}

impl<I, M> TaskQueue<I, M> {
  /// Creates a new `TaskQueue` holding at most `capacity` pending tasks.
  pub(crate) fn new(capacity: usize) -> Self {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    Self { tx, rx }
  }

  /// Splits the queue into its producer and consumer halves.
  pub(crate) fn split(self) -> (QueueProducer<I, M>, QueueConsumer<I, M>) {
    (
      QueueProducer { tx: self.tx },
      QueueConsumer {
        rx: Arc::new(AsyncMutex::new(self.rx)),
      },
    )
  }
}

/// The producer handle. The queue closes once every producer is dropped.
pub(crate) struct QueueProducer<I, M> {
  tx: mpsc::Sender<QueueMessage<I, M>>,
}

impl<I, M> Clone for QueueProducer<I, M> {
  fn clone(&self) -> Self {
    Self { tx: self.tx.clone() }
  }
}

impl<I, M> fmt::Debug for QueueProducer<I, M> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueProducer")
      .field("len", &self.len())
      .field("capacity", &self.tx.max_capacity())
      .finish_non_exhaustive()
  }
}

impl<I, M> QueueProducer<I, M> {
  /// Waits for a free slot in the queue.
  ///
  /// Returns `None` if every consumer is gone. Dropping the returned slot, or
  /// this future before it completes, leaves the queue unchanged.
  pub(crate) async fn reserve(&self) -> Option<QueueSlot<'_, I, M>> {
    self.tx.reserve().await.ok().map(|permit| QueueSlot { permit })
  }

  /// Number of tasks waiting in the queue.
  pub(crate) fn len(&self) -> usize {
    self.tx.max_capacity() - self.tx.capacity()
  }
}

/// A reserved position in the queue.
pub(crate) struct QueueSlot<'a, I, M> {
  permit: mpsc::Permit<'a, QueueMessage<I, M>>,
}

impl<I, M> QueueSlot<'_, I, M> {
  pub(crate) fn send(self, message: QueueMessage<I, M>) {
    self.permit.send(message);
  }
}

/// The consumer handle, shared by every worker.
pub(crate) struct QueueConsumer<I, M> {
  rx: Arc<AsyncMutex<mpsc::Receiver<QueueMessage<I, M>>>>,
}

impl<I, M> Clone for QueueConsumer<I, M> {
  fn clone(&self) -> Self {
    Self { rx: self.rx.clone() }
  }
}

impl<I, M> QueueConsumer<I, M> {
  /// Receives the next task.
  ///
  /// Returns `None` once the queue is closed and drained.
  pub(crate) async fn recv(&self) -> Option<QueueMessage<I, M>> {
    let mut rx = self.rx.lock().await;
    rx.recv().await
  }
}
