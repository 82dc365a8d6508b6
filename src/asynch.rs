//! Async handles let any thread wake the loop and get an [AsyncEvent]
//! published on the loop thread.
//!
//! The handle itself is bound to the loop thread. To signal it from elsewhere,
//! take an [AsyncSender] with [AsyncHandle::sender] and move that to the
//! worker. Sends are fire-and-forget and may be merged: however many arrive
//! before the loop gets around to them, at least one event is published, and
//! never more events than sends.

use std::fmt;
use std::ops::Deref;

use crate::error::{LoopError, LoopResult};
use crate::event::AsyncEvent;
use crate::event_loop::Loop;
use crate::handle::{Handle, Kind};
use crate::reactor::AsyncSignal;

/// A loop-resident handle that can be signalled from any thread
#[derive(Clone)]
pub struct AsyncHandle(Handle<AsyncHandle>);

impl Kind for AsyncHandle {
  type Native = AsyncSignal;
  fn wrap(core: Handle<Self>) -> Self { Self(core) }
  fn core(&self) -> &Handle<Self> { &self.0 }
}

impl AsyncHandle {
  fn send_callback(handle: &AsyncHandle) { handle.publish(AsyncEvent) }

  /// Create a new async handle on the loop. It must be initialized with
  /// [AsyncHandle::init] before it can be signalled.
  #[must_use]
  pub fn create(lp: &Loop) -> Self { Self(Handle::create(lp)) }

  /// Bind the handle to its loop. Unlike handles that need a separate start
  /// step, an async handle is armed as soon as this succeeds.
  pub fn init(&self) -> LoopResult<()> { self.initialize(AsyncSignal::init, Self::send_callback) }

  /// Wake the loop from the loop thread itself. Failures are published as
  /// [crate::event::ErrorEvent]s.
  pub fn send(&self) { self.invoke(AsyncSignal::send); }

  /// Obtain a thread-safe token that signals this handle
  pub fn sender(&self) -> LoopResult<AsyncSender> {
    self.0.with_native(|signal| AsyncSender(signal.clone())).ok_or(LoopError::NotInitialized)
  }
}

impl Deref for AsyncHandle {
  type Target = Handle<AsyncHandle>;
  fn deref(&self) -> &Self::Target { &self.0 }
}

impl fmt::Debug for AsyncHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("AsyncHandle").field(&self.0).finish()
  }
}

/// Signals an [AsyncHandle] from any thread. Clones signal the same handle.
#[derive(Clone, Debug)]
pub struct AsyncSender(AsyncSignal);

impl AsyncSender {
  /// Ask the loop to publish an [AsyncEvent] on the handle as soon as it can.
  ///
  /// Nothing is returned. If the signal can't be delivered, eg. because the
  /// handle was closed, the failure is published as an
  /// [crate::event::ErrorEvent] on the loop thread instead. Once the close
  /// has completed there is no handle left to publish on, so the failure is
  /// only logged.
  pub fn send(&self) {
    if let Err(error) = self.0.send() {
      tracing::warn!(id = %self.0.id(), %error, "async send failed");
      self.0.report(error)
    }
  }
}
