// src/error.rs

use core::fmt;

/// Error returned by `put` and `put_with` when the channel was already
/// closed at the time the put was attempted. The value being put is
/// returned to the caller.
#[derive(PartialEq, Eq, Clone)]
pub enum PutError<T> {
  /// The channel is closed; the rejected value is returned.
  Closed(T),
}

impl<T> PutError<T> {
  /// Consumes the error, returning the value that was not delivered.
  #[inline]
  pub fn into_inner(self) -> T {
    match self {
      PutError::Closed(v) => v,
    }
  }
}

impl<T> fmt::Debug for PutError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PutError::Closed(_) => write!(f, "PutError::Closed(..)"),
    }
  }
}

impl<T> fmt::Display for PutError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("put on closed channel")
  }
}

impl<T> std::error::Error for PutError<T> {}

/// Error returned by `try_put` when the value could not be accepted
/// immediately. The value being put is returned in either case.
#[derive(PartialEq, Eq, Clone)]
pub enum TryPutError<T> {
  /// No room and no waiting taker; completing the put would park.
  Full(T),
  /// The channel is closed.
  Closed(T),
}

impl<T> TryPutError<T> {
  /// Consumes the error, returning the value that was not delivered.
  #[inline]
  pub fn into_inner(self) -> T {
    match self {
      TryPutError::Full(v) => v,
      TryPutError::Closed(v) => v,
    }
  }
}

impl<T> fmt::Debug for TryPutError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TryPutError::Full(_) => write!(f, "TryPutError::Full(..)"),
      TryPutError::Closed(_) => write!(f, "TryPutError::Closed(..)"),
    }
  }
}

impl<T> fmt::Display for TryPutError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TryPutError::Full(_) => f.write_str("channel has no immediate room for the value"),
      TryPutError::Closed(_) => f.write_str("put on closed channel"),
    }
  }
}

impl<T> std::error::Error for TryPutError<T> {}

/// Error returned by `try_take` when no value could be taken immediately.
///
/// A closed, drained channel is not an error: `try_take` reports it as
/// `Ok(None)`, the same sentinel the blocking take uses.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TryTakeError {
  /// Nothing buffered and no waiting putter; completing the take would park.
  Empty,
}

impl fmt::Display for TryTakeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TryTakeError::Empty => f.write_str("channel has no immediately available value"),
    }
  }
}

impl std::error::Error for TryTakeError {}
