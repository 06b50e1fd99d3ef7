#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! CSP-style channels for Rust.
//!
//! Skein provides rendezvous and buffered channels with close semantics,
//! a non-deterministic choice primitive ([`Alt`]) that commits exactly one
//! of several pending operations, timeout channels, and a lightweight task
//! runtime ([`task::spawn`]) whose state machines park at channel
//! operations without holding an operating-system thread.
//!
//! The synchronous surface (`take`, `put`, `Alt::select`) blocks the
//! calling thread; the callback surface (`take_with`, `put_with`) and the
//! task runtime run continuations on a shared dispatch pool instead.

pub mod alt;
pub mod buffer;
pub mod channel;
pub mod error;
pub mod task;
pub mod timer;

mod dispatch;
mod handler;
mod sync_util;

pub use alt::{Alt, AltValue};
pub use buffer::{Buffer, OverflowPolicy};
pub use channel::Channel;
pub use error::{PutError, TryPutError, TryTakeError};
pub use task::{Machine, Resume, Step};
pub use timer::timeout;
