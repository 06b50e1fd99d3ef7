//! Utilities for synchronous blocking.
//!
//! The blocking public surface (`take`, `put`, `Alt::select`) bridges the
//! callback protocol back to the calling thread with a one-shot slot.

use parking_lot::{Condvar, Mutex};

/// A single-value rendezvous between a channel callback and a blocked
/// caller. `deliver` fills the slot from whichever thread the callback
/// lands on; `wait` blocks until it is filled.
pub(crate) struct Parker<V> {
  slot: Mutex<Option<V>>,
  filled: Condvar,
}

impl<V> Parker<V> {
  pub(crate) fn new() -> Self {
    Parker {
      slot: Mutex::new(None),
      filled: Condvar::new(),
    }
  }

  pub(crate) fn deliver(&self, value: V) {
    let mut slot = self.slot.lock();
    debug_assert!(slot.is_none(), "parker delivered twice");
    *slot = Some(value);
    self.filled.notify_one();
  }

  pub(crate) fn wait(&self) -> V {
    let mut slot = self.slot.lock();
    loop {
      match slot.take() {
        Some(value) => return value,
        None => self.filled.wait(&mut slot),
      }
    }
  }
}
