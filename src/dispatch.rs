// src/dispatch.rs

//! The executor that runs handler callbacks off the caller's stack.
//!
//! A fixed pool of worker threads drains a shared FIFO of boxed jobs.
//! The pool is created lazily on first use and lives for the rest of the
//! process. Channel code hands the *opposite* side's callback here after
//! a commit, so a putter never runs taker code on its own stack and vice
//! versa.

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// Environment variable overriding the worker count.
const POOL_SIZE_VAR: &str = "SKEIN_DISPATCH_THREADS";
const DEFAULT_POOL_SIZE: usize = 8;

type Job = Box<dyn FnOnce() + Send>;

struct Executor {
  queue: Mutex<VecDeque<Job>>,
  available: Condvar,
}

static EXECUTOR: Lazy<Arc<Executor>> = Lazy::new(|| {
  let executor = Arc::new(Executor {
    queue: Mutex::new(VecDeque::new()),
    available: Condvar::new(),
  });

  let size = pool_size();
  tracing::debug!(threads = size, "starting dispatch pool");
  for i in 0..size {
    let ex = Arc::clone(&executor);
    thread::Builder::new()
      .name(format!("skein-dispatch-{i}"))
      .spawn(move || worker(ex))
      .expect("failed to spawn dispatch worker");
  }

  executor
});

fn pool_size() -> usize {
  match std::env::var(POOL_SIZE_VAR) {
    Ok(raw) => match raw.parse::<usize>() {
      Ok(n) if n >= 1 => n,
      _ => {
        tracing::warn!(value = %raw, "ignoring invalid {POOL_SIZE_VAR}");
        DEFAULT_POOL_SIZE
      }
    },
    Err(_) => DEFAULT_POOL_SIZE,
  }
}

fn worker(executor: Arc<Executor>) {
  loop {
    let job = {
      let mut queue = executor.queue.lock();
      loop {
        match queue.pop_front() {
          Some(job) => break job,
          None => executor.available.wait(&mut queue),
        }
      }
    };
    // A panicking callback must not take the worker down with it.
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
      tracing::error!(
        payload = crate::task::panic_message(payload.as_ref()),
        "dispatched callback panicked"
      );
    }
  }
}

/// Enqueues a job for execution on the dispatch pool.
pub(crate) fn run(job: Job) {
  let executor = &*EXECUTOR;
  executor.queue.lock().push_back(job);
  executor.available.notify_one();
}
