//! Failures reported by handles and the loop they live on.
//!
//! Setup failures are returned synchronously from `init`. Anything that goes
//! wrong afterwards is published to the handle's listeners as an
//! [crate::event::ErrorEvent] so the loop thread is never unwound by a
//! resource error.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Everything that can go wrong with a loop or a handle bound to it
#[derive(Debug, Clone, Error)]
pub enum LoopError {
  /// The operating system refused a poller operation
  #[error("poller failure: {0}")]
  Io(Arc<io::Error>),
  /// `init` was called on a handle that is already bound to its loop
  #[error("the handle is already initialized")]
  AlreadyInitialized,
  /// An operation needs the native resource but `init` hasn't succeeded yet
  #[error("the handle is not initialized")]
  NotInitialized,
  /// The handle was closed, it can no longer be signalled
  #[error("the handle is closed")]
  Closed,
  /// The loop refused to register another handle
  #[error("the loop cannot hold more than {limit} handles")]
  HandleLimit {
    /// The configured maximum
    limit: usize,
  },
  /// The loop that owned this resource has been dropped
  #[error("the loop is gone")]
  LoopGone,
}

impl LoopError {
  /// Whether a retry of the same operation may succeed
  #[must_use]
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Io(_) | Self::HandleLimit { .. })
  }
}

impl From<io::Error> for LoopError {
  fn from(value: io::Error) -> Self { Self::Io(Arc::new(value)) }
}

/// Result of an operation on a loop or handle
pub type LoopResult<T> = Result<T, LoopError>;
