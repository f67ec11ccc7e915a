//! Hard cancellation for timers that must not fire after their owner moved on.
//!
//! Most timers are fenced by epoch identity instead. Tokens are for the few
//! that need to die mid-epoch, like observer reconnect backoff.

use std::cell::Cell;
use std::rc::Rc;

/// Cloneable, single-threaded cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Rc<Cell<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}
