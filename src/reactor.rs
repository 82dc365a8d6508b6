//! The wakeup machinery under a [Loop]. A single [polling::Poller] is shared
//! by the loop thread, which blocks on it, and by every [AsyncSignal], which
//! may notify it from any thread.
//!
//! Signals never carry pointers to handles across threads. They enqueue the
//! [ResourceId] they were registered under and the loop resolves it through
//! its registry.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use polling::{Events, Poller};

use crate::error::{LoopError, LoopResult};
use crate::event_loop::Loop;
use crate::handle::Native;

/// Identifies a resource registered with a loop. Issued once at
/// initialization, never reused within the same loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub(crate) u64);
impl fmt::Display for ResourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// The loop's end of the wakeup channel, shared with every signal.
pub(crate) struct WakePort {
  poller: Poller,
  ready: Mutex<VecDeque<Arc<SignalState>>>,
  faults: Mutex<VecDeque<(ResourceId, LoopError)>>,
  shut: AtomicBool,
}

impl WakePort {
  pub fn new() -> LoopResult<Arc<Self>> {
    Ok(Arc::new(Self {
      poller: Poller::new()?,
      ready: Mutex::new(VecDeque::new()),
      faults: Mutex::new(VecDeque::new()),
      shut: AtomicBool::new(false),
    }))
  }

  fn check_open(&self) -> LoopResult<()> {
    match self.shut.load(Ordering::Acquire) {
      true => Err(LoopError::LoopGone),
      false => Ok(()),
    }
  }

  fn enqueue(&self, signal: Arc<SignalState>) -> LoopResult<()> {
    {
      // checked under the lock so shut_down can't slip in before the push
      let mut ready = self.ready.lock();
      self.check_open()?;
      ready.push_back(signal);
    }
    Ok(self.poller.notify()?)
  }

  /// Record a failure that happened off the loop thread so the loop can
  /// publish it to the owning handle
  pub fn report(&self, id: ResourceId, error: LoopError) {
    {
      let mut faults = self.faults.lock();
      if self.check_open().is_err() {
        tracing::trace!(%id, %error, "fault after the loop was dropped");
        return;
      }
      faults.push_back((id, error));
    }
    if let Err(e) = self.poller.notify() {
      tracing::warn!(%id, error = %e, "could not wake the loop to report a fault");
    }
  }

  /// Whether a wait should return immediately
  pub fn has_pending(&self) -> bool {
    !self.ready.lock().is_empty() || !self.faults.lock().is_empty()
  }

  /// Block until notified or until the timeout elapses. Interrupts count as
  /// an empty wakeup.
  pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> LoopResult<()> {
    events.clear();
    match self.poller.wait(events, timeout) {
      Ok(_) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  /// Number of signals currently queued. The loop only serves this many in
  /// one iteration, so a listener that keeps resending can't starve it.
  pub fn ready_len(&self) -> usize { self.ready.lock().len() }

  /// Number of faults currently queued
  pub fn fault_len(&self) -> usize { self.faults.lock().len() }

  /// Take the oldest queued signal. Its pending flag is cleared here, so a
  /// send racing with the callback queues a new wakeup. Everything behind it
  /// stays queued until taken.
  pub fn pop_ready(&self) -> Option<ResourceId> {
    let signal = self.ready.lock().pop_front()?;
    signal.pending.store(false, Ordering::Release);
    Some(signal.id)
  }

  /// Take the oldest queued fault
  pub fn pop_fault(&self) -> Option<(ResourceId, LoopError)> { self.faults.lock().pop_front() }

  /// Refuse further signals. Queued signals are dropped, which breaks the
  /// reference cycle between them and this port.
  pub fn shut_down(&self) {
    let dropped = {
      let mut ready = self.ready.lock();
      self.shut.store(true, Ordering::Release);
      mem::take(&mut *ready)
    };
    self.faults.lock().clear();
    mem::drop(dropped)
  }
}

impl fmt::Debug for WakePort {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WakePort").field("shut", &self.shut.load(Ordering::Relaxed)).finish()
  }
}

struct SignalState {
  id: ResourceId,
  /// Set by the first send after a delivery, cleared by the loop right
  /// before the callback runs
  pending: AtomicBool,
  closed: AtomicBool,
  port: Arc<WakePort>,
}

/// The native block behind an [crate::asynch::AsyncHandle]. Every clone
/// refers to the same signal, and all of them may be used from any thread.
#[derive(Clone)]
pub struct AsyncSignal(Arc<SignalState>);

impl AsyncSignal {
  /// Register a new signal with the loop. The signal is live as soon as this
  /// returns.
  pub fn init(lp: &Loop, id: ResourceId) -> LoopResult<Self> {
    let port = lp.port();
    port.check_open()?;
    Ok(Self(Arc::new(SignalState {
      id,
      pending: AtomicBool::new(false),
      closed: AtomicBool::new(false),
      port,
    })))
  }

  /// The resource this signal belongs to
  pub fn id(&self) -> ResourceId { self.0.id }

  /// Request a wakeup. Sends that arrive while an earlier one is still
  /// undelivered are merged into it.
  pub fn send(&self) -> LoopResult<()> {
    if self.0.closed.load(Ordering::Acquire) {
      return Err(LoopError::Closed);
    }
    if self.0.pending.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    let res = self.0.port.enqueue(self.0.clone());
    if res.is_err() {
      self.0.pending.store(false, Ordering::Release);
    }
    res
  }

  /// Forward a failure to the loop thread
  pub fn report(&self, error: LoopError) { self.0.port.report(self.0.id, error) }

  /// Whether a send is waiting for the loop
  pub fn is_pending(&self) -> bool { self.0.pending.load(Ordering::Acquire) }
}

impl Native for AsyncSignal {
  fn close(&self) { self.0.closed.store(true, Ordering::Release) }
}

impl fmt::Debug for AsyncSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncSignal")
      .field("id", &self.0.id)
      .field("pending", &self.is_pending())
      .field("closed", &self.0.closed.load(Ordering::Relaxed))
      .finish()
  }
}
