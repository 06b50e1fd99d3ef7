// Selection semantics: one-shot commit, defaults, fairness, priority,
// timeouts, and the inertness of losing clauses.

use skein::{timeout, Alt, AltValue, Channel, TryPutError};

use std::thread;
use std::time::{Duration, Instant};

#[test]
fn default_fires_when_nothing_is_ready() {
  let ch: Channel<i32> = Channel::rendezvous();
  let (label, value) = Alt::new().take("data", &ch).otherwise("idle", 7).select();
  assert_eq!(label, "idle");
  assert_eq!(value, AltValue::Default(7));
}

#[test]
fn blocks_until_some_clause_is_ready() {
  let c1: Channel<&'static str> = Channel::rendezvous();
  let c2: Channel<&'static str> = Channel::rendezvous();
  let tx = c2.clone();
  let producer = thread::spawn(move || {
    thread::sleep(Duration::from_millis(10));
    tx.put("b").unwrap();
  });

  let (label, value) = Alt::new().take("a", &c1).take("b", &c2).select();
  assert_eq!(label, "b");
  assert_eq!(value, AltValue::Taken(Some("b")));
  producer.join().unwrap();
}

#[test]
fn timeout_wins_an_idle_alt() {
  let ch: Channel<i32> = Channel::rendezvous();
  let timer = timeout(50);
  let started = Instant::now();
  let (label, value) = Alt::new().take("data", &ch).take("timer", &timer).select();
  assert_eq!(label, "timer");
  assert_eq!(value, AltValue::Taken(None));
  assert!(
    started.elapsed() >= Duration::from_millis(40),
    "timer fired early: {:?}",
    started.elapsed()
  );
}

#[test]
fn choice_between_ready_clauses_is_roughly_uniform() {
  let c1: Channel<i32> = Channel::buffered(1);
  let c2: Channel<i32> = Channel::buffered(1);
  let rounds = 2_000;
  let mut a_wins = 0;

  for _ in 0..rounds {
    // Keep both channels continuously ready; the loser of the previous
    // round still holds its value.
    let _ = c1.try_put(1);
    let _ = c2.try_put(2);
    let (label, _value) = Alt::new().take("a", &c1).take("b", &c2).select();
    if label == "a" {
      a_wins += 1;
    }
  }

  let ratio = a_wins as f64 / rounds as f64;
  assert!(
    (0.40..=0.60).contains(&ratio),
    "alt choice is biased: a won {ratio:.3} of {rounds} rounds"
  );
}

#[test]
fn priority_mode_prefers_declaration_order() {
  let c1: Channel<i32> = Channel::buffered(1);
  let c2: Channel<i32> = Channel::buffered(1);

  for _ in 0..50 {
    let _ = c1.try_put(1);
    let _ = c2.try_put(2);
    let (label, _value) = Alt::new().take("a", &c1).take("b", &c2).priority().select();
    assert_eq!(label, "a");
  }
}

#[test]
fn exactly_one_clause_commits() {
  let c1: Channel<i32> = Channel::buffered(1);
  let c2: Channel<i32> = Channel::buffered(1);
  c1.put(10).unwrap();
  c2.put(20).unwrap();

  let (label, value) = Alt::new().take("a", &c1).take("b", &c2).select();
  let (winner, loser, expected) = match label {
    "a" => (&c1, &c2, 10),
    _ => (&c2, &c1, 20),
  };
  assert_eq!(value, AltValue::Taken(Some(expected)));

  // The losing channel keeps its value; the winner is drained.
  assert!(winner.try_take().is_err());
  assert!(loser.try_take().unwrap().is_some());
}

#[test]
fn put_clause_delivers_to_a_taker() {
  let ch: Channel<i32> = Channel::rendezvous();
  let rx = ch.clone();
  let taker = thread::spawn(move || rx.take());
  thread::sleep(Duration::from_millis(10));

  let (label, value) = Alt::new().put("out", &ch, 5).select();
  assert_eq!(label, "out");
  assert_eq!(value, AltValue::Put(true));
  assert_eq!(taker.join().unwrap(), Some(5));
}

#[test]
fn put_clause_on_a_closed_channel_commits_with_failure() {
  let ch: Channel<i32> = Channel::rendezvous();
  ch.close();
  let (label, value) = Alt::new().put("out", &ch, 5).select();
  assert_eq!(label, "out");
  assert_eq!(value, AltValue::Put(false));
}

#[test]
fn losing_handlers_are_inert() {
  let ch: Channel<i32> = Channel::rendezvous();

  // Park an alt handler on `ch`, then decide the alt via the default.
  let (label, _value) = Alt::new().take("data", &ch).otherwise("idle", 0).select();
  assert_eq!(label, "idle");

  // The residual handler must not accept a transfer: a try_put finds no
  // live taker.
  match ch.try_put(1) {
    Err(TryPutError::Full(_)) => {}
    other => panic!("residual alt handler accepted a value: {other:?}"),
  }

  // A real taker still works normally afterwards.
  let rx = ch.clone();
  let taker = thread::spawn(move || rx.take());
  thread::sleep(Duration::from_millis(10));
  assert_eq!(ch.put(2), Ok(true));
  assert_eq!(taker.join().unwrap(), Some(2));
}

#[test]
fn two_alts_can_rendezvous_with_each_other() {
  let ch: Channel<i32> = Channel::rendezvous();
  let side: Channel<i32> = Channel::rendezvous();

  let tx = ch.clone();
  let idle = side.clone();
  let putter = thread::spawn(move || Alt::new().put("put", &tx, 1).take("side", &idle).select());

  let (label, value) = loop {
    match Alt::new().take("take", &ch).otherwise("idle", 0).select() {
      ("idle", _) => thread::sleep(Duration::from_millis(1)),
      decided => break decided,
    }
  };
  assert_eq!(label, "take");
  assert_eq!(value, AltValue::Taken(Some(1)));

  let (other_label, other_value) = putter.join().unwrap();
  assert_eq!(other_label, "put");
  assert_eq!(other_value, AltValue::Put(true));
}
