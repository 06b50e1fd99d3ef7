// src/timer.rs

//! Timeout channels.
//!
//! `timeout(msecs)` hands back a channel that a dedicated wheel thread
//! closes once the delay elapses; takers observe `None` and an alt racing
//! it observes a won take clause. Nothing is ever put on a timeout
//! channel.
//!
//! Requests of the same element type whose deadlines land within
//! `RESOLUTION_MS` of an already scheduled timer share that timer's
//! channel, bounding the number of live timers under bursty use.

use crate::channel::{ChanShared, Channel};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Two timeouts closer together than this share one channel.
const RESOLUTION_MS: u64 = 10;

type CloseThunk = Box<dyn FnOnce() + Send>;

struct WheelState {
  /// Deadline (ms since the wheel epoch) to the channels to close then.
  due: BTreeMap<u64, Vec<CloseThunk>>,
  /// Per-element-type index of scheduled timers, for coalescing. Values
  /// are `BTreeMap<u64, Weak<ChanShared<T>>>` behind the `Any`.
  index: HashMap<TypeId, Box<dyn Any + Send>>,
}

struct TimerWheel {
  state: Mutex<WheelState>,
  changed: Condvar,
}

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

fn now_ms() -> u64 {
  EPOCH.elapsed().as_millis() as u64
}

static WHEEL: Lazy<Arc<TimerWheel>> = Lazy::new(|| {
  let wheel = Arc::new(TimerWheel {
    state: Mutex::new(WheelState {
      due: BTreeMap::new(),
      index: HashMap::new(),
    }),
    changed: Condvar::new(),
  });
  let worker_wheel = Arc::clone(&wheel);
  thread::Builder::new()
    .name("skein-timer".into())
    .spawn(move || worker(worker_wheel))
    .expect("failed to spawn timer thread");
  tracing::debug!("timer wheel started");
  wheel
});

fn worker(wheel: Arc<TimerWheel>) {
  loop {
    let thunks = {
      let mut state = wheel.state.lock();
      loop {
        let now = now_ms();
        match state.due.first_key_value().map(|(deadline, _)| *deadline) {
          None => wheel.changed.wait(&mut state),
          Some(deadline) if deadline <= now => {
            let (_deadline, thunks) = state.due.pop_first().expect("nonempty due map");
            break thunks;
          }
          Some(deadline) => {
            let _ = wheel
              .changed
              .wait_for(&mut state, Duration::from_millis(deadline - now));
          }
        }
      }
    };
    tracing::trace!(timers = thunks.len(), "closing due timeout channels");
    for close in thunks {
      close();
    }
  }
}

/// Returns a channel that closes once `msecs` milliseconds have elapsed.
///
/// The element type is whatever the surrounding alt or take requires; no
/// value is ever delivered, so a take on a timeout channel always yields
/// `None` at the deadline.
pub fn timeout<T: Send + 'static>(msecs: u64) -> Channel<T> {
  let wheel = &**WHEEL;
  let mut state = wheel.state.lock();
  let now = now_ms();
  let deadline = now + msecs;

  let WheelState { due, index } = &mut *state;
  let typed = index
    .entry(TypeId::of::<T>())
    .or_insert_with(|| Box::new(BTreeMap::<u64, Weak<ChanShared<T>>>::new()))
    .downcast_mut::<BTreeMap<u64, Weak<ChanShared<T>>>>()
    .expect("timer index entry matches its TypeId key");

  // Drop fired and abandoned timers before scanning.
  typed.retain(|scheduled, weak| *scheduled >= now && weak.upgrade().is_some());

  if let Some((_scheduled, weak)) = typed
    .range(deadline..deadline.saturating_add(RESOLUTION_MS))
    .next()
  {
    if let Some(shared) = weak.upgrade() {
      return Channel::from_shared(shared);
    }
  }

  let channel: Channel<T> = Channel::rendezvous();
  typed.insert(deadline, channel.shared_weak());
  let closer = channel.clone();
  due.entry(deadline).or_default().push(Box::new(move || closer.close()));
  wheel.changed.notify_one();
  channel
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn closes_after_the_delay() {
    let started = Instant::now();
    let ch: Channel<i32> = timeout(50);
    assert_eq!(ch.take(), None);
    assert!(
      started.elapsed() >= Duration::from_millis(40),
      "timeout fired early: {:?}",
      started.elapsed()
    );
  }

  // The wheel is process-global and these tests run in parallel, so each
  // uses a deadline band far from the others' to keep the coalescing
  // windows from overlapping across tests.

  #[test]
  fn nearby_deadlines_share_a_channel() {
    let a: Channel<i32> = timeout(5_000);
    let b: Channel<i32> = timeout(4_995);
    assert!(a.same_channel(&b), "deadlines within resolution should coalesce");
  }

  #[test]
  fn distant_deadlines_get_distinct_channels() {
    let a: Channel<i32> = timeout(3_000);
    let b: Channel<i32> = timeout(3_400);
    assert!(!a.same_channel(&b));
  }

  #[test]
  fn coalescing_is_per_element_type() {
    // Channels of different element types must not disturb each other's
    // wheel bookkeeping, even with overlapping deadlines.
    let a: Channel<i32> = timeout(7_000);
    let b: Channel<String> = timeout(6_995);
    let c: Channel<i32> = timeout(6_995);
    assert!(a.same_channel(&c), "same-type deadlines should coalesce");
    assert!(!b.is_closed());
  }
}
