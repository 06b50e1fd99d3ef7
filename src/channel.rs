// src/channel.rs

//! The rendezvous / buffered channel core.
//!
//! This module contains the `ChanShared` struct which holds the central
//! mutex-protected state of a channel: the optional buffer, the FIFO
//! queues of pending takers and putters, and the closed flag.
//!
//! ### Design principles
//!
//! 1.  **Central mutex**: a `parking_lot::Mutex` guards all state changes.
//!     There is no global lock; channels contend only with themselves.
//! 2.  **Handler queues**: waiters are one-shot `Handler` tokens. A waiter
//!     enqueued here may be committed elsewhere first (an alt winning on
//!     another channel), so every dequeue re-checks liveness under the
//!     handler's own lock and dead handlers are swept once a queue crosses
//!     `SWEEP_THRESHOLD`.
//! 3.  **Opposite side on dispatch**: when a transfer commits, the calling
//!     side's callback is handed back to the caller while the matched
//!     side's callback is scheduled on the dispatch pool, so neither party
//!     runs the other's continuation on its own stack.
//! 4.  **Dual-handler locking**: matching a taker against a pending putter
//!     commits two handlers at once; their locks are always acquired in
//!     ascending `lock_id` order.

use crate::buffer::Buffer;
use crate::dispatch;
use crate::error::{PutError, TryPutError, TryTakeError};
use crate::handler::{Callback, FnHandler, Handler};
use crate::sync_util::Parker;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

/// Queue length at which an enqueue first sweeps out inactive handlers.
const SWEEP_THRESHOLD: usize = 64;

/// Hard cap on pending operations per side of one channel. Exceeding it is
/// a leak in the caller (unserviced puts or takes piling up), not load.
const MAX_QUEUE_SIZE: usize = 1024;

/// A parked put: the handler to commit plus the value it carries.
struct PendingPut<T> {
  handler: Box<dyn Handler<bool>>,
  value: T,
}

struct ChanInternal<T> {
  buf: Option<Buffer<T>>,
  takers: VecDeque<Box<dyn Handler<Option<T>>>>,
  putters: VecDeque<PendingPut<T>>,
  closed: bool,
}

impl<T> ChanInternal<T> {
  fn enqueue_taker(&mut self, handler: Box<dyn Handler<Option<T>>>) {
    if self.takers.len() >= SWEEP_THRESHOLD {
      self.takers.retain(|h| h.is_active());
    }
    assert!(
      self.takers.len() < MAX_QUEUE_SIZE,
      "no more than {MAX_QUEUE_SIZE} pending takes are allowed on a single channel",
    );
    self.takers.push_back(handler);
  }

  fn enqueue_putter(&mut self, pending: PendingPut<T>) {
    if self.putters.len() >= SWEEP_THRESHOLD {
      self.putters.retain(|p| p.handler.is_active());
    }
    assert!(
      self.putters.len() < MAX_QUEUE_SIZE,
      "no more than {MAX_QUEUE_SIZE} pending puts are allowed on a single channel",
    );
    self.putters.push_back(pending);
  }
}

/// The shared owner of a channel's state, wrapped in an `Arc` by `Channel`.
pub(crate) struct ChanShared<T> {
  internal: Mutex<ChanInternal<T>>,
}

/// Outcome of the internal take protocol.
pub(crate) enum TakeOutcome<T> {
  /// The taker committed immediately. The caller runs the callback with
  /// the value (`None` = channel closed), or consumes the value directly.
  Ready(Callback<Option<T>>, Option<T>),
  /// The taker was enqueued, or was found already committed elsewhere.
  Pending,
  /// The handler refused to park and nothing was immediately available.
  WouldBlock,
}

/// Outcome of the internal put protocol.
pub(crate) enum PutOutcome<T> {
  /// The putter committed immediately. `true` = value transferred or
  /// buffered.
  Ready(Callback<bool>, bool),
  /// The putter was enqueued, or was found already committed elsewhere.
  Pending,
  /// The handler refused to park; the value is handed back.
  WouldBlock(T),
  /// The channel was closed at call time; the value is handed back.
  Closed(T),
}

/// A FIFO conduit for values between concurrent participants, with
/// optional buffering and a closed terminal state.
///
/// `Channel` is a cheap clonable handle; clones share the same underlying
/// queue. A take on a closed, drained channel yields `None`; because
/// `None` is the closed sentinel, channels carry plain values and never
/// `Option`s of their own.
pub struct Channel<T> {
  shared: Arc<ChanShared<T>>,
}

impl<T> Clone for Channel<T> {
  fn clone(&self) -> Self {
    Channel {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T> fmt::Debug for Channel<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let internal = self.shared.internal.lock();
    f.debug_struct("Channel")
      .field("buffered", &internal.buf.as_ref().map_or(0, |b| b.len()))
      .field("pending_takes", &internal.takers.len())
      .field("pending_puts", &internal.putters.len())
      .field("closed", &internal.closed)
      .finish()
  }
}

impl<T: Send + 'static> Channel<T> {
  /// An unbuffered channel: every put rendezvouses with a take.
  pub fn rendezvous() -> Self {
    Self::build(None)
  }

  /// A channel backed by a blocking buffer of `capacity` slots. A
  /// capacity of zero behaves exactly like a rendezvous channel.
  pub fn buffered(capacity: usize) -> Self {
    Self::build(Some(Buffer::fixed(capacity)))
  }

  /// A channel backed by the given buffer (fixed, dropping, or sliding).
  pub fn with_buffer(buffer: Buffer<T>) -> Self {
    Self::build(Some(buffer))
  }

  fn build(buf: Option<Buffer<T>>) -> Self {
    Channel {
      shared: Arc::new(ChanShared {
        internal: Mutex::new(ChanInternal {
          buf,
          takers: VecDeque::new(),
          putters: VecDeque::new(),
          closed: false,
        }),
      }),
    }
  }

  pub(crate) fn from_shared(shared: Arc<ChanShared<T>>) -> Self {
    Channel { shared }
  }

  pub(crate) fn shared_weak(&self) -> Weak<ChanShared<T>> {
    Arc::downgrade(&self.shared)
  }

  /// True if both handles refer to the same underlying channel.
  pub fn same_channel(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.shared, &other.shared)
  }

  /// True once `close` has been called on any handle.
  pub fn is_closed(&self) -> bool {
    self.shared.internal.lock().closed
  }

  // --- Core protocol ---

  pub(crate) fn take_impl(&self, mut handler: Box<dyn Handler<Option<T>>>) -> TakeOutcome<T> {
    let mut internal = self.shared.internal.lock();

    if !handler.is_active() {
      return TakeOutcome::Pending;
    }

    // Buffered values are served first; they outlive close.
    if internal.buf.as_ref().map_or(false, |b| !b.is_empty()) {
      handler.lock();
      let take_cb = if handler.is_active() { handler.commit() } else { None };
      handler.unlock();
      let take_cb = match take_cb {
        Some(cb) => cb,
        None => return TakeOutcome::Pending,
      };

      let value = internal
        .buf
        .as_mut()
        .expect("buffer present")
        .pop()
        .expect("buffer nonempty");

      // The freed slot can admit one parked putter.
      let mut promoted: Option<Callback<bool>> = None;
      while let Some(mut pending) = internal.putters.pop_front() {
        pending.handler.lock();
        let put_cb = if pending.handler.is_active() {
          pending.handler.commit()
        } else {
          None
        };
        pending.handler.unlock();
        if let Some(cb) = put_cb {
          internal.buf.as_mut().expect("buffer present").push(pending.value);
          promoted = Some(cb);
          break;
        }
      }

      drop(internal);
      if let Some(cb) = promoted {
        dispatch::run(Box::new(move || cb(true)));
      }
      return TakeOutcome::Ready(take_cb, Some(value));
    }

    // Nothing buffered: match a waiting putter directly.
    let taker_id = handler.lock_id();
    let mut i = 0;
    while i < internal.putters.len() {
      let putter_id = internal.putters[i].handler.lock_id();
      // Clauses of one alt share a lock id and must not pair with each
      // other; committing one would retire the other.
      if putter_id != 0 && putter_id == taker_id {
        i += 1;
        continue;
      }

      let pending = &mut internal.putters[i];
      if taker_id < putter_id {
        handler.lock();
        pending.handler.lock();
      } else {
        pending.handler.lock();
        handler.lock();
      }
      let both_active = handler.is_active() && pending.handler.is_active();
      let take_cb = if both_active { handler.commit() } else { None };
      let put_cb = if both_active { pending.handler.commit() } else { None };
      if taker_id < putter_id {
        pending.handler.unlock();
        handler.unlock();
      } else {
        handler.unlock();
        pending.handler.unlock();
      }

      if let (Some(take_cb), Some(put_cb)) = (take_cb, put_cb) {
        let pending = internal.putters.remove(i).expect("matched putter indexed");
        drop(internal);
        dispatch::run(Box::new(move || put_cb(true)));
        return TakeOutcome::Ready(take_cb, Some(pending.value));
      }
      if !handler.is_active() {
        // Our side lost to another alt clause while matching.
        return TakeOutcome::Pending;
      }
      // Dead putter: discard it and try the next one.
      internal.putters.remove(i);
    }

    if internal.closed {
      handler.lock();
      let take_cb = if handler.is_active() { handler.commit() } else { None };
      handler.unlock();
      return match take_cb {
        Some(cb) => TakeOutcome::Ready(cb, None),
        None => TakeOutcome::Pending,
      };
    }

    if !handler.is_blockable() {
      return TakeOutcome::WouldBlock;
    }
    internal.enqueue_taker(handler);
    TakeOutcome::Pending
  }

  pub(crate) fn put_impl(&self, value: T, mut handler: Box<dyn Handler<bool>>) -> PutOutcome<T> {
    let mut internal = self.shared.internal.lock();

    if internal.closed {
      return PutOutcome::Closed(value);
    }
    if !handler.is_active() {
      return PutOutcome::Pending;
    }

    // Room in the buffer: absorb the value. Dropping and sliding buffers
    // never report full, so they absorb at capacity as well.
    if internal.buf.as_ref().map_or(false, |b| !b.is_full()) {
      handler.lock();
      let put_cb = if handler.is_active() { handler.commit() } else { None };
      handler.unlock();
      let put_cb = match put_cb {
        Some(cb) => cb,
        None => return PutOutcome::Pending,
      };

      internal.buf.as_mut().expect("buffer present").push(value);

      // Hand buffered values to as many waiting takers as they cover.
      let mut wakeups: Vec<(Callback<Option<T>>, T)> = Vec::new();
      while internal.buf.as_ref().map_or(false, |b| !b.is_empty()) {
        let mut taker = match internal.takers.pop_front() {
          Some(t) => t,
          None => break,
        };
        taker.lock();
        let take_cb = if taker.is_active() { taker.commit() } else { None };
        taker.unlock();
        if let Some(cb) = take_cb {
          let v = internal
            .buf
            .as_mut()
            .expect("buffer present")
            .pop()
            .expect("buffer nonempty");
          wakeups.push((cb, v));
        }
      }

      drop(internal);
      for (cb, v) in wakeups {
        dispatch::run(Box::new(move || cb(Some(v))));
      }
      return PutOutcome::Ready(put_cb, true);
    }

    // No room: match a waiting taker directly.
    let putter_id = handler.lock_id();
    let mut i = 0;
    while i < internal.takers.len() {
      let taker_id = internal.takers[i].lock_id();
      if taker_id != 0 && taker_id == putter_id {
        i += 1;
        continue;
      }

      let taker = &mut internal.takers[i];
      if putter_id < taker_id {
        handler.lock();
        taker.lock();
      } else {
        taker.lock();
        handler.lock();
      }
      let both_active = handler.is_active() && taker.is_active();
      let put_cb = if both_active { handler.commit() } else { None };
      let take_cb = if both_active { taker.commit() } else { None };
      if putter_id < taker_id {
        taker.unlock();
        handler.unlock();
      } else {
        handler.unlock();
        taker.unlock();
      }

      if let (Some(put_cb), Some(take_cb)) = (put_cb, take_cb) {
        internal.takers.remove(i);
        drop(internal);
        dispatch::run(Box::new(move || take_cb(Some(value))));
        return PutOutcome::Ready(put_cb, true);
      }
      if !handler.is_active() {
        return PutOutcome::Pending;
      }
      internal.takers.remove(i);
    }

    if !handler.is_blockable() {
      return PutOutcome::WouldBlock(value);
    }
    internal.enqueue_putter(PendingPut { handler, value });
    PutOutcome::Pending
  }

  /// Closes the channel. Idempotent.
  ///
  /// Every pending taker is committed with `None`. Every pending putter is
  /// committed with `false` and its value dropped: a parked put completes
  /// without transferring rather than staying parked forever. New puts
  /// after close fail synchronously with [`PutError::Closed`]. Buffered
  /// values remain takeable until the buffer drains.
  pub fn close(&self) {
    let (takers, putters) = {
      let mut internal = self.shared.internal.lock();
      if internal.closed {
        return;
      }
      internal.closed = true;
      (
        std::mem::take(&mut internal.takers),
        std::mem::take(&mut internal.putters),
      )
    };

    tracing::trace!(
      takers = takers.len(),
      putters = putters.len(),
      "channel closed, draining waiters"
    );

    for mut taker in takers {
      taker.lock();
      let cb = if taker.is_active() { taker.commit() } else { None };
      taker.unlock();
      if let Some(cb) = cb {
        dispatch::run(Box::new(move || cb(None)));
      }
    }
    for mut pending in putters {
      pending.handler.lock();
      let cb = if pending.handler.is_active() {
        pending.handler.commit()
      } else {
        None
      };
      pending.handler.unlock();
      if let Some(cb) = cb {
        dispatch::run(Box::new(move || cb(false)));
      }
      // pending.value is dropped here, undelivered.
    }
  }

  // --- Blocking surface ---

  /// Takes a value, blocking the calling thread until one is available.
  /// Returns `None` once the channel is closed and drained.
  pub fn take(&self) -> Option<T> {
    let parker = Arc::new(Parker::new());
    let p = Arc::clone(&parker);
    match self.take_impl(Box::new(FnHandler::new(move |v| p.deliver(v)))) {
      // The committed callback is our own parker; consume the value
      // directly instead of bouncing it through the slot.
      TakeOutcome::Ready(_cb, value) => value,
      TakeOutcome::Pending => parker.wait(),
      TakeOutcome::WouldBlock => unreachable!(),
    }
  }

  /// Puts a value, blocking the calling thread until the channel accepts
  /// it. `Ok(true)` means the value was transferred or buffered;
  /// `Ok(false)` means the channel closed while the put was parked and the
  /// value was discarded.
  ///
  /// # Errors
  ///
  /// Returns [`PutError::Closed`] when the channel was already closed at
  /// the time of the call.
  pub fn put(&self, value: T) -> Result<bool, PutError<T>> {
    let parker = Arc::new(Parker::new());
    let p = Arc::clone(&parker);
    match self.put_impl(value, Box::new(FnHandler::new(move |accepted| p.deliver(accepted)))) {
      PutOutcome::Ready(_cb, accepted) => Ok(accepted),
      PutOutcome::Pending => Ok(parker.wait()),
      PutOutcome::Closed(v) => Err(PutError::Closed(v)),
      PutOutcome::WouldBlock(_) => unreachable!(),
    }
  }

  // --- Asynchronous surface ---

  /// Registers `f` to receive the next value (or `None` at close). When
  /// the take completes immediately, `f` runs on the calling thread if
  /// `on_caller` is true and on the dispatch pool otherwise.
  pub fn take_with(&self, f: impl FnOnce(Option<T>) + Send + 'static, on_caller: bool) {
    match self.take_impl(Box::new(FnHandler::new(f))) {
      TakeOutcome::Ready(cb, value) => {
        if on_caller {
          cb(value);
        } else {
          dispatch::run(Box::new(move || cb(value)));
        }
      }
      TakeOutcome::Pending => {}
      TakeOutcome::WouldBlock => unreachable!(),
    }
  }

  /// Puts a value without blocking the caller; `f` observes the outcome
  /// (`false` = discarded at close while parked). Placement of `f` follows
  /// `on_caller` as in [`Channel::take_with`].
  ///
  /// # Errors
  ///
  /// Returns [`PutError::Closed`] when the channel was already closed at
  /// the time of the call; `f` is not invoked in that case.
  pub fn put_with(
    &self,
    value: T,
    f: impl FnOnce(bool) + Send + 'static,
    on_caller: bool,
  ) -> Result<(), PutError<T>> {
    match self.put_impl(value, Box::new(FnHandler::new(f))) {
      PutOutcome::Ready(cb, accepted) => {
        if on_caller {
          cb(accepted);
        } else {
          dispatch::run(Box::new(move || cb(accepted)));
        }
        Ok(())
      }
      PutOutcome::Pending => Ok(()),
      PutOutcome::Closed(v) => Err(PutError::Closed(v)),
      PutOutcome::WouldBlock(_) => unreachable!(),
    }
  }

  // --- Nonblocking surface ---

  /// Takes a value only if one is immediately available. `Ok(None)` means
  /// the channel is closed and drained.
  ///
  /// # Errors
  ///
  /// Returns [`TryTakeError::Empty`] when completing the take would park.
  pub fn try_take(&self) -> Result<Option<T>, TryTakeError> {
    match self.take_impl(Box::new(FnHandler::non_blocking(|_| {}))) {
      TakeOutcome::Ready(_cb, value) => Ok(value),
      TakeOutcome::WouldBlock => Err(TryTakeError::Empty),
      TakeOutcome::Pending => unreachable!(),
    }
  }

  /// Puts a value only if the channel can accept it immediately.
  ///
  /// # Errors
  ///
  /// Returns [`TryPutError::Full`] when completing the put would park, and
  /// [`TryPutError::Closed`] when the channel is closed.
  pub fn try_put(&self, value: T) -> Result<bool, TryPutError<T>> {
    match self.put_impl(value, Box::new(FnHandler::non_blocking(|_| {}))) {
      PutOutcome::Ready(_cb, accepted) => Ok(accepted),
      PutOutcome::WouldBlock(v) => Err(TryPutError::Full(v)),
      PutOutcome::Closed(v) => Err(TryPutError::Closed(v)),
      PutOutcome::Pending => unreachable!(),
    }
  }
}
