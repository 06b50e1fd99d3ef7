// src/handler.rs

//! One-shot commit tokens for channel waiters.
//!
//! Every pending channel operation is represented by a `Handler`: a token
//! that can be committed exactly once, yielding the callback to run with
//! the operation's outcome. Plain operations use `FnHandler`, which is
//! never contended. Alt clauses use `AltHandler` (see `alt`), where many
//! handlers share one flag so that committing any clause retires them all.
//!
//! ### Locking protocol
//!
//! Channel code commits a handler as: `lock()`, check `is_active()`,
//! `commit()`, `unlock()`. When a transfer must commit two handlers at
//! once (matching a taker against a pending putter), both locks are
//! acquired in ascending `lock_id` order. `FnHandler` has id 0 and no-op
//! locks; every alt flag draws a unique positive id from a global counter,
//! so the order is total and two concurrent alts cannot deadlock.

use std::sync::atomic::{AtomicU64, Ordering};

/// The callback a committed handler surrenders. Takers receive
/// `Option<T>` (`None` = channel closed); putters receive `bool`
/// (`false` = the parked value was discarded at close).
pub(crate) type Callback<A> = Box<dyn FnOnce(A) + Send>;

/// A one-shot commit token wrapping a callback.
pub(crate) trait Handler<A>: Send {
  /// Monotonic lock order for dual-handler commits; 0 means uncontended.
  fn lock_id(&self) -> u64 {
    0
  }

  /// Whether this handler is still eligible to fire.
  fn is_active(&self) -> bool;

  /// Whether the handler may be parked on a pending queue. Non-blockable
  /// handlers back the `try_` operations: the channel returns a
  /// would-block outcome instead of enqueueing them.
  fn is_blockable(&self) -> bool {
    true
  }

  /// Acquires the commit lock. Paired with `unlock`.
  fn lock(&self);

  /// Releases the commit lock.
  fn unlock(&self);

  /// Atomically retires the handler and returns its callback. Returns
  /// `None` if the handler has already been committed. Call only while
  /// the lock is held and `is_active` was observed true.
  fn commit(&mut self) -> Option<Callback<A>>;
}

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh positive lock id for an alt flag.
pub(crate) fn next_lock_id() -> u64 {
  NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handler for plain (non-alt) operations: always active, uncontended,
/// one-shot by surrendering its callback.
pub(crate) struct FnHandler<A> {
  f: Option<Callback<A>>,
  blockable: bool,
}

impl<A> FnHandler<A> {
  pub(crate) fn new(f: impl FnOnce(A) + Send + 'static) -> Self {
    FnHandler {
      f: Some(Box::new(f)),
      blockable: true,
    }
  }

  /// A handler that refuses to park; used by `try_take` / `try_put`.
  pub(crate) fn non_blocking(f: impl FnOnce(A) + Send + 'static) -> Self {
    FnHandler {
      f: Some(Box::new(f)),
      blockable: false,
    }
  }
}

impl<A> Handler<A> for FnHandler<A> {
  fn is_active(&self) -> bool {
    true
  }

  fn is_blockable(&self) -> bool {
    self.blockable
  }

  fn lock(&self) {}

  fn unlock(&self) {}

  fn commit(&mut self) -> Option<Callback<A>> {
    self.f.take()
  }
}
