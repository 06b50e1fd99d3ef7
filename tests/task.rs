// The parking task runtime: machines that produce, consume, converse,
// select, and fail, observed through their result channels.

use skein::task::{self, Machine, Resume, Step};
use skein::{timeout, Alt, AltValue, Channel};

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Puts each item on the channel in order, closes it, and finishes with
/// the number of items delivered.
struct Producer {
  ch: Channel<i32>,
  items: Vec<i32>,
  next: usize,
}

impl Machine<i32> for Producer {
  fn step(&mut self, input: Resume<i32>) -> Step<i32> {
    match input {
      Resume::Start | Resume::Put(true) => {}
      Resume::Put(false) => return Step::Done(None),
      other => panic!("unexpected resume: {other:?}"),
    }
    if self.next < self.items.len() {
      let value = self.items[self.next];
      self.next += 1;
      Step::Put(self.ch.clone(), value)
    } else {
      self.ch.close();
      Step::Done(Some(self.next as i32))
    }
  }
}

/// Takes until the channel closes, summing what it saw.
struct Consumer {
  ch: Channel<i32>,
  sum: i32,
}

impl Machine<i32> for Consumer {
  fn step(&mut self, input: Resume<i32>) -> Step<i32> {
    match input {
      Resume::Start => Step::Take(self.ch.clone()),
      Resume::Taken(Some(v)) => {
        self.sum += v;
        Step::Take(self.ch.clone())
      }
      Resume::Taken(None) => Step::Done(Some(self.sum)),
      other => panic!("unexpected resume: {other:?}"),
    }
  }
}

#[test]
fn producer_task_feeds_a_blocking_taker() {
  let ch: Channel<i32> = Channel::rendezvous();
  let result = task::spawn(Producer {
    ch: ch.clone(),
    items: vec![1, 2, 3],
    next: 0,
  });

  assert_eq!(ch.take(), Some(1));
  assert_eq!(ch.take(), Some(2));
  assert_eq!(ch.take(), Some(3));
  assert_eq!(ch.take(), None, "producer closes its channel when done");

  assert_eq!(result.take(), Some(3));
  assert_eq!(result.take(), None, "result channel closes after the value");
}

#[test]
fn consumer_task_sums_until_close() {
  let ch: Channel<i32> = Channel::buffered(4);
  for v in [1, 2, 3, 4] {
    ch.put(v).unwrap();
  }
  ch.close();

  let result = task::spawn(Consumer { ch, sum: 0 });
  assert_eq!(result.take(), Some(10));
}

#[test]
fn close_wakes_a_parked_task() {
  let ch: Channel<i32> = Channel::rendezvous();
  let result = task::spawn(Consumer { ch: ch.clone(), sum: 0 });

  thread::sleep(Duration::from_millis(20));
  ch.close();
  assert_eq!(result.take(), Some(0));
}

/// Sends `round` on ping, awaits the echo on pong, and repeats.
struct Pinger {
  ping: Channel<i32>,
  pong: Channel<i32>,
  rounds: i32,
  round: i32,
}

impl Machine<i32> for Pinger {
  fn step(&mut self, input: Resume<i32>) -> Step<i32> {
    match input {
      Resume::Start => Step::Put(self.ping.clone(), self.round),
      Resume::Put(true) => Step::Take(self.pong.clone()),
      Resume::Taken(Some(echo)) => {
        assert_eq!(echo, self.round);
        self.round += 1;
        if self.round < self.rounds {
          Step::Put(self.ping.clone(), self.round)
        } else {
          self.ping.close();
          Step::Done(Some(self.round))
        }
      }
      other => panic!("unexpected resume: {other:?}"),
    }
  }
}

/// Echoes everything from ping back onto pong until ping closes.
struct Ponger {
  ping: Channel<i32>,
  pong: Channel<i32>,
}

impl Machine<i32> for Ponger {
  fn step(&mut self, input: Resume<i32>) -> Step<i32> {
    match input {
      Resume::Start | Resume::Put(true) => Step::Take(self.ping.clone()),
      Resume::Taken(Some(v)) => Step::Put(self.pong.clone(), v),
      Resume::Taken(None) => Step::Done(None),
      other => panic!("unexpected resume: {other:?}"),
    }
  }
}

#[test]
fn two_tasks_ping_pong_without_threads() {
  let ping: Channel<i32> = Channel::rendezvous();
  let pong: Channel<i32> = Channel::rendezvous();

  let pinger = task::spawn(Pinger {
    ping: ping.clone(),
    pong: pong.clone(),
    rounds: 100,
    round: 0,
  });
  let ponger = task::spawn(Ponger { ping, pong });

  assert_eq!(pinger.take(), Some(100));
  assert_eq!(ponger.take(), None, "ponger finishes without a value");
}

/// Parks on an alt between a data channel and a timer.
struct WithDeadline {
  data: Channel<i32>,
  timer: Channel<i32>,
}

impl Machine<i32> for WithDeadline {
  fn step(&mut self, input: Resume<i32>) -> Step<i32> {
    match input {
      Resume::Start => Step::Alt(
        Alt::new()
          .take("data", &self.data)
          .take("timer", &self.timer),
      ),
      Resume::Chosen("data", AltValue::Taken(v)) => Step::Done(v),
      Resume::Chosen("timer", AltValue::Taken(None)) => Step::Done(Some(-1)),
      other => panic!("unexpected resume: {other:?}"),
    }
  }
}

#[test]
fn task_alt_times_out_on_an_idle_channel() {
  let data: Channel<i32> = Channel::rendezvous();
  let result = task::spawn(WithDeadline {
    data,
    timer: timeout(50),
  });
  assert_eq!(result.take(), Some(-1));
}

#[test]
fn task_alt_takes_data_when_available() {
  let data: Channel<i32> = Channel::buffered(1);
  data.put(33).unwrap();
  let result = task::spawn(WithDeadline {
    data,
    timer: timeout(5_000),
  });
  assert_eq!(result.take(), Some(33));
}

struct PutsToClosed {
  ch: Channel<i32>,
}

impl Machine<i32> for PutsToClosed {
  fn step(&mut self, input: Resume<i32>) -> Step<i32> {
    match input {
      Resume::Start => Step::Put(self.ch.clone(), 5),
      // Tasks have no synchronous caller to raise to; the failed put
      // resumes as unaccepted.
      Resume::Put(false) => Step::Done(Some(99)),
      other => panic!("unexpected resume: {other:?}"),
    }
  }
}

#[test]
fn task_put_on_closed_channel_resumes_unaccepted() {
  let ch: Channel<i32> = Channel::rendezvous();
  ch.close();
  let result = task::spawn(PutsToClosed { ch });
  assert_eq!(result.take(), Some(99));
}

struct Explodes;

impl Machine<i32> for Explodes {
  fn step(&mut self, _input: Resume<i32>) -> Step<i32> {
    panic!("machine exploded");
  }
}

static HOOK_SAW_PANIC: AtomicBool = AtomicBool::new(false);

#[test]
fn panicking_task_closes_its_result_channel() {
  task::set_panic_hook(|payload| {
    if payload
      .downcast_ref::<&'static str>()
      .is_some_and(|msg| msg.contains("machine exploded"))
    {
      HOOK_SAW_PANIC.store(true, Ordering::SeqCst);
    }
  });

  let result = task::spawn(Explodes);
  assert_eq!(result.take(), None, "no value is published on panic");
  assert!(HOOK_SAW_PANIC.load(Ordering::SeqCst), "panic hook not invoked");
}
