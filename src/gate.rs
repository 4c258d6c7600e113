use crate::config::CancelCallback;
use crate::error::GroupError;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::Mutex;
use tracing::{debug, error};

struct GateState {
  error: Option<GroupError>,
  on_cancel: Option<CancelCallback>,
  cancelled: bool,
}

/// Run-once gate holding the group's latched error and its cancellation callback.
///
/// The error slot and the callback are guarded by the same lock: the call that
/// latches the error is the one that takes the callback, so the group never
/// ends up with a latched error and a pending cancellation, or the reverse.
pub(crate) struct FailureGate {
  state: Mutex<GateState>,
}

impl fmt::Debug for FailureGate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("FailureGate")
      .field("error", &state.error)
      .field("cancelled", &state.cancelled)
      .finish()
  }
}

impl FailureGate {
  pub(crate) fn new(on_cancel: Option<CancelCallback>) -> Self {
    Self {
      state: Mutex::new(GateState {
        error: None,
        on_cancel,
        cancelled: false,
      }),
    }
  }

  /// Latches `error` and fires cancellation, unless an error is already latched.
  ///
  /// Returns true if this call won the gate.
  pub(crate) fn trip(&self, error: GroupError) -> bool {
    let callback = {
      let mut state = self.state.lock();
      if state.error.is_some() {
        return false;
      }
      state.error = Some(error);
      state.cancelled = true;
      state.on_cancel.take()
    };
    debug!("Latched first group error.");
    run_callback(callback);
    true
  }

  /// Fires cancellation if nothing has fired it yet.
  pub(crate) fn cancel(&self) {
    let callback = {
      let mut state = self.state.lock();
      state.cancelled = true;
      state.on_cancel.take()
    };
    run_callback(callback);
  }

  pub(crate) fn error(&self) -> Option<GroupError> {
    self.state.lock().error.clone()
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.state.lock().cancelled
  }
}

fn run_callback(callback: Option<CancelCallback>) {
  if let Some(callback) = callback {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
      error!("Group cancellation callback panicked.");
    }
  }
}
