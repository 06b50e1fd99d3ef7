// src/alt.rs

//! Non-deterministic choice over channel operations.
//!
//! An alt call races several take/put clauses and commits exactly one.
//! Every clause wraps the same shared [`AltFlag`]; whichever clause's
//! channel commits first flips the flag, instantly retiring the other
//! clauses. Handlers left behind on losing channels are inactive and get
//! swept by the channels lazily.
//!
//! Fairness comes from visiting the clauses in a uniformly random
//! permutation drawn from the thread-local PRNG; `priority` restores
//! declaration order for callers that want deterministic preference.

use crate::channel::{Channel, PutOutcome, TakeOutcome};
use crate::handler::{next_lock_id, Callback, Handler};
use crate::sync_util::Parker;

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The shared commit token behind every clause of one alt call.
///
/// The raw mutex is what the channel's dual-handler locking protocol
/// acquires; the unique positive lock id gives those acquisitions a total
/// order across concurrent alts.
pub(crate) struct AltFlag {
  raw: RawMutex,
  active: AtomicBool,
  id: u64,
}

impl AltFlag {
  pub(crate) fn new() -> Self {
    AltFlag {
      raw: RawMutex::INIT,
      active: AtomicBool::new(true),
      id: next_lock_id(),
    }
  }

  pub(crate) fn is_active(&self) -> bool {
    self.active.load(Ordering::Acquire)
  }

  pub(crate) fn lock(&self) {
    self.raw.lock();
  }

  pub(crate) fn unlock(&self) {
    // The flag's lock/unlock calls are strictly paired by the handler
    // protocol, so the mutex is held here.
    unsafe { self.raw.unlock() };
  }

  fn deactivate(&self) {
    self.active.store(false, Ordering::Release);
  }

  /// Claims the alt for a clause decided outside the channel protocol
  /// (the default clause, or a put clause finding its channel closed).
  /// Returns false when some other clause already committed.
  fn try_claim(&self) -> bool {
    self.lock();
    let won = self.is_active();
    if won {
      self.deactivate();
    }
    self.unlock();
    won
  }
}

/// Per-clause handler: delegates liveness and locking to the shared flag,
/// carries the clause's own delivery callback.
pub(crate) struct AltHandler<A> {
  flag: Arc<AltFlag>,
  cb: Option<Callback<A>>,
}

impl<A> AltHandler<A> {
  pub(crate) fn new(flag: Arc<AltFlag>, f: impl FnOnce(A) + Send + 'static) -> Self {
    AltHandler {
      flag,
      cb: Some(Box::new(f)),
    }
  }
}

impl<A: 'static> Handler<A> for AltHandler<A> {
  fn lock_id(&self) -> u64 {
    self.flag.id
  }

  fn is_active(&self) -> bool {
    self.flag.is_active()
  }

  fn lock(&self) {
    self.flag.lock();
  }

  fn unlock(&self) {
    self.flag.unlock();
  }

  fn commit(&mut self) -> Option<Callback<A>> {
    self.flag.deactivate();
    self.cb.take()
  }
}

/// What the winning clause produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltValue<T> {
  /// A take clause won; `None` means its channel was closed.
  Taken(Option<T>),
  /// A put clause won; `false` means the channel refused the value
  /// (closed before or while the put was pending).
  Put(bool),
  /// No clause was ready; the default value is handed back.
  Default(T),
}

enum Op<T> {
  Take(Channel<T>),
  Put(Channel<T>, T),
}

struct Clause<L, T> {
  label: L,
  op: Op<T>,
}

/// A one-shot selection over several channel operations.
///
/// Build it up with [`Alt::take`] / [`Alt::put`] clauses (plus at most one
/// [`Alt::otherwise`] default), then call [`Alt::select`] to block until
/// exactly one clause commits:
///
/// ```rust,ignore
/// let (label, value) = Alt::new()
///   .take("data", &data_chan)
///   .take("quit", &quit_chan)
///   .otherwise("idle", 0)
///   .select();
/// ```
pub struct Alt<L, T> {
  clauses: Vec<Clause<L, T>>,
  default: Option<(L, T)>,
  priority: bool,
}

impl<L, T> fmt::Debug for Alt<L, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Alt")
      .field("clauses", &self.clauses.len())
      .field("has_default", &self.default.is_some())
      .field("priority", &self.priority)
      .finish()
  }
}

impl<L, T> Default for Alt<L, T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<L, T> Alt<L, T> {
  /// An empty selection. Add clauses before calling [`Alt::select`].
  pub fn new() -> Self {
    Alt {
      clauses: Vec::new(),
      default: None,
      priority: false,
    }
  }

  /// Adds a take clause on `channel`.
  pub fn take(mut self, label: L, channel: &Channel<T>) -> Self {
    self.clauses.push(Clause {
      label,
      op: Op::Take(channel.clone()),
    });
    self
  }

  /// Adds a put clause delivering `value` to `channel`.
  pub fn put(mut self, label: L, channel: &Channel<T>, value: T) -> Self {
    self.clauses.push(Clause {
      label,
      op: Op::Put(channel.clone(), value),
    });
    self
  }

  /// Adds a default: when no clause can commit immediately, the alt
  /// returns `(label, AltValue::Default(value))` instead of parking.
  pub fn otherwise(mut self, label: L, value: T) -> Self {
    self.default = Some((label, value));
    self
  }

  /// Visits clauses in declaration order instead of a random permutation.
  pub fn priority(mut self) -> Self {
    self.priority = true;
    self
  }
}

impl<L, T> Alt<L, T>
where
  L: Clone + Send + 'static,
  T: Send + 'static,
{
  /// Blocks the calling thread until exactly one clause (or the default)
  /// commits, and returns its label and value.
  ///
  /// # Panics
  ///
  /// Panics when called with no clauses and no default.
  pub fn select(self) -> (L, AltValue<T>) {
    let parker = Arc::new(Parker::new());
    let p = Arc::clone(&parker);
    if let Some(decided) = self.run(move |result| p.deliver(result)) {
      return decided;
    }
    parker.wait()
  }

  /// The selection algorithm shared by `select` and the task runtime.
  ///
  /// Returns `Some` when a clause commits synchronously; otherwise the
  /// clause handlers are parked and `deliver` fires later, exactly once,
  /// from the thread that completes the winning operation.
  pub(crate) fn run(
    self,
    deliver: impl Fn((L, AltValue<T>)) + Send + Sync + 'static,
  ) -> Option<(L, AltValue<T>)> {
    assert!(
      !self.clauses.is_empty() || self.default.is_some(),
      "alt requires at least one clause or a default",
    );

    let flag = Arc::new(AltFlag::new());
    let deliver: Arc<dyn Fn((L, AltValue<T>)) + Send + Sync> = Arc::new(deliver);

    let mut order: Vec<usize> = (0..self.clauses.len()).collect();
    if !self.priority {
      order.shuffle(&mut rand::thread_rng());
    }

    let mut slots: Vec<Option<Clause<L, T>>> = self.clauses.into_iter().map(Some).collect();
    for idx in order {
      let Clause { label, op } = slots[idx].take().expect("each clause visited once");
      match op {
        Op::Take(channel) => {
          let d = Arc::clone(&deliver);
          let l = label.clone();
          let handler = AltHandler::new(Arc::clone(&flag), move |v| d((l, AltValue::Taken(v))));
          if let TakeOutcome::Ready(_cb, value) = channel.take_impl(Box::new(handler)) {
            // The committed callback is the delivery closure above;
            // short-circuit it and hand the result straight back.
            return Some((label, AltValue::Taken(value)));
          }
        }
        Op::Put(channel, value) => {
          let d = Arc::clone(&deliver);
          let l = label.clone();
          let handler = AltHandler::new(Arc::clone(&flag), move |ok| d((l, AltValue::Put(ok))));
          match channel.put_impl(value, Box::new(handler)) {
            PutOutcome::Ready(_cb, ok) => return Some((label, AltValue::Put(ok))),
            PutOutcome::Closed(_v) => {
              // A closed channel makes the clause immediately decidable:
              // the put fails. Claim the flag unless a racing clause beat
              // us to it.
              if flag.try_claim() {
                return Some((label, AltValue::Put(false)));
              }
              return None;
            }
            PutOutcome::Pending | PutOutcome::WouldBlock(_) => {}
          }
        }
      }
    }

    if let Some((label, value)) = self.default {
      if flag.try_claim() {
        return Some((label, AltValue::Default(value)));
      }
    }
    None
  }
}
