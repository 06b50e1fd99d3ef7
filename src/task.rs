// src/task.rs

//! The parking task runtime.
//!
//! A task is an explicit state machine driven by the channel layer: each
//! [`Machine::step`] call either finishes with a final value or names the
//! channel operation to park on. The driver issues that operation with a
//! handler whose callback re-enters the driver, so a parked task holds no
//! thread; it is resumed as a dispatch work item when the operation
//! commits.
//!
//! `spawn` returns a capacity-1 result channel. When the machine reaches
//! [`Step::Done`], its value (if any) is written there and the channel is
//! closed; consumers take the result exactly like any other channel value.
//!
//! Within a single task, operations happen in program order. Across
//! tasks, only channel-level ordering applies.

use crate::alt::{Alt, AltValue};
use crate::channel::{Channel, PutOutcome, TakeOutcome};
use crate::dispatch;
use crate::handler::FnHandler;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::any::Any;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// The value that re-enters a machine after a park.
#[derive(Debug)]
pub enum Resume<T, L = &'static str> {
  /// First entry into a freshly spawned machine.
  Start,
  /// A take completed; `None` means the channel closed.
  Taken(Option<T>),
  /// A put completed; `false` means the channel closed and discarded the
  /// value instead of transferring it.
  Put(bool),
  /// An alt committed the labeled clause.
  Chosen(L, AltValue<T>),
}

/// What a machine does next.
#[derive(Debug)]
pub enum Step<T, L = &'static str> {
  /// Park on a take; the machine resumes with [`Resume::Taken`].
  Take(Channel<T>),
  /// Park on a put of the value; the machine resumes with [`Resume::Put`].
  Put(Channel<T>, T),
  /// Park on an alt; the machine resumes with [`Resume::Chosen`].
  Alt(Alt<L, T>),
  /// Terminal step: publish the value (if any) on the result channel and
  /// close it.
  Done(Option<T>),
}

/// A resumable task body.
///
/// Implementations are hand-written state machines (or the output of a
/// code generator): `step` consumes the resume value of the previous
/// operation and decides the next suspension point. `step` must not
/// block; blocking belongs in plain threads using the synchronous channel
/// surface.
pub trait Machine<T, L = &'static str>: Send + 'static {
  /// Advances the machine. Called once with [`Resume::Start`], then once
  /// per completed channel operation.
  fn step(&mut self, input: Resume<T, L>) -> Step<T, L>;
}

type PanicHook = Box<dyn Fn(&(dyn Any + Send)) + Send + Sync>;

static PANIC_HOOK: OnceCell<PanicHook> = OnceCell::new();

/// Installs a process-wide observer for panics escaping task machines.
/// Returns false if a hook was already installed. Independent of the
/// hook, a panicking task always closes its result channel without
/// delivering a value.
pub fn set_panic_hook(hook: impl Fn(&(dyn Any + Send)) + Send + Sync + 'static) -> bool {
  PANIC_HOOK.set(Box::new(hook)).is_ok()
}

/// Best-effort rendering of a panic payload for logs.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    s
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s
  } else {
    "opaque panic payload"
  }
}

fn report_panic(payload: &(dyn Any + Send)) {
  tracing::error!(
    payload = panic_message(payload),
    "task panicked; result channel closed without a value"
  );
  if let Some(hook) = PANIC_HOOK.get() {
    hook(payload);
  }
}

struct Task<T, L, M> {
  machine: Mutex<M>,
  result: Channel<T>,
  _labels: PhantomData<fn(L) -> L>,
}

impl<T, L, M> Task<T, L, M>
where
  T: Send + 'static,
  L: Clone + Send + 'static,
  M: Machine<T, L>,
{
  /// Drives the machine until it parks or finishes. Runs inline while
  /// operations complete immediately; a parked operation re-enters here
  /// from the thread that commits it.
  fn resume(task: &Arc<Self>, first: Resume<T, L>) {
    let mut machine = task.machine.lock();
    let mut input = first;
    loop {
      let stepped = {
        let m = &mut *machine;
        let incoming = input;
        catch_unwind(AssertUnwindSafe(move || m.step(incoming)))
      };
      let step = match stepped {
        Ok(step) => step,
        Err(payload) => {
          drop(machine);
          report_panic(payload.as_ref());
          task.result.close();
          return;
        }
      };

      match step {
        Step::Done(value) => {
          drop(machine);
          if let Some(value) = value {
            // The capacity-1 result buffer always has room for this
            // single write.
            let _ = task.result.put_with(value, |_| {}, true);
          }
          task.result.close();
          return;
        }
        Step::Take(channel) => {
          let t = Arc::clone(task);
          let handler = FnHandler::new(move |v| Task::resume(&t, Resume::Taken(v)));
          match channel.take_impl(Box::new(handler)) {
            TakeOutcome::Ready(_cb, value) => input = Resume::Taken(value),
            TakeOutcome::Pending => return,
            TakeOutcome::WouldBlock => unreachable!(),
          }
        }
        Step::Put(channel, value) => {
          let t = Arc::clone(task);
          let handler = FnHandler::new(move |accepted| Task::resume(&t, Resume::Put(accepted)));
          match channel.put_impl(value, Box::new(handler)) {
            PutOutcome::Ready(_cb, accepted) => input = Resume::Put(accepted),
            // A task has no synchronous caller to raise to; a put on an
            // already-closed channel resumes as an unaccepted put.
            PutOutcome::Closed(_v) => input = Resume::Put(false),
            PutOutcome::Pending => return,
            PutOutcome::WouldBlock(_) => unreachable!(),
          }
        }
        Step::Alt(alt) => {
          let t = Arc::clone(task);
          match alt.run(move |(label, value)| Task::resume(&t, Resume::Chosen(label, value))) {
            Some((label, value)) => input = Resume::Chosen(label, value),
            None => return,
          }
        }
      }
    }
  }
}

/// Spawns a task around the machine and returns its result channel.
///
/// The first step runs as a dispatch work item, not on the caller's
/// stack. The returned channel delivers the machine's final value (when
/// it finishes with one) and then closes; a machine that finishes without
/// a value, or panics, just closes it.
pub fn spawn<T, L, M>(machine: M) -> Channel<T>
where
  T: Send + 'static,
  L: Clone + Send + 'static,
  M: Machine<T, L>,
{
  let task = Arc::new(Task {
    machine: Mutex::new(machine),
    result: Channel::buffered(1),
    _labels: PhantomData,
  });
  let result = task.result.clone();
  dispatch::run(Box::new(move || Task::resume(&task, Resume::Start)));
  result
}
