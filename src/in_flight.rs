use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Counts submitted tasks that have not completed yet.
///
/// Incremented at submission, decremented by the worker that completes the
/// task. `wait_drained` returns once the count reaches zero; everything a
/// worker wrote before its `done` is visible to the waiter afterwards.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
  count: AtomicUsize,
  drained: Notify,
}

impl InFlight {
  pub(crate) fn add(&self) {
    self.count.fetch_add(1, Ordering::AcqRel);
  }

  pub(crate) fn done(&self) {
    if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
      self.drained.notify_waiters();
    }
  }

  /// Marks one task as completed when the returned guard is dropped,
  /// including during unwinding.
  pub(crate) fn completion(&self) -> Completion<'_> {
    Completion { in_flight: self }
  }

  pub(crate) fn count(&self) -> usize {
    self.count.load(Ordering::Acquire)
  }

  pub(crate) async fn wait_drained(&self) {
    loop {
      let notified = self.drained.notified();
      tokio::pin!(notified);
      // Register before checking, so a `done` racing with the check is not missed.
      notified.as_mut().enable();
      if self.count() == 0 {
        return;
      }
      notified.await;
    }
  }
}

pub(crate) struct Completion<'a> {
  in_flight: &'a InFlight,
}

impl Drop for Completion<'_> {
  fn drop(&mut self) {
    self.in_flight.done();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn test_wait_returns_immediately_when_empty() {
    let in_flight = InFlight::default();
    tokio::time::timeout(Duration::from_millis(50), in_flight.wait_drained())
      .await
      .expect("wait_drained should not block on an empty counter");
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_wait_until_all_done() {
    let in_flight = Arc::new(InFlight::default());
    for _ in 0..10 {
      in_flight.add();
    }
    assert_eq!(in_flight.count(), 10);

    for i in 0..10u64 {
      let in_flight = in_flight.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5 * i)).await;
        in_flight.done();
      });
    }

    tokio::time::timeout(Duration::from_secs(2), in_flight.wait_drained())
      .await
      .expect("wait_drained did not observe the drain");
    assert_eq!(in_flight.count(), 0);
  }

  #[test]
  fn test_completion_guard_counts_on_unwind() {
    let in_flight = InFlight::default();
    in_flight.add();
    in_flight.add();

    drop(in_flight.completion());
    assert_eq!(in_flight.count(), 1);

    let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
      let _completion = in_flight.completion();
      panic!("worker failure");
    }));
    assert!(unwound.is_err());
    assert_eq!(in_flight.count(), 0);
  }
}
