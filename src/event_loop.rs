//! The loop handles bind to. It owns the registry of live resources and runs
//! their native callbacks on the thread that calls [Loop::run].
//!
//! ```
//! use loopbell::asynch::AsyncHandle;
//! use loopbell::event::AsyncEvent;
//! use loopbell::event_loop::{Loop, RunMode};
//!
//! let lp = Loop::new().unwrap();
//! let handle = AsyncHandle::create(&lp);
//! handle.init().unwrap();
//! handle.on(|_: &AsyncEvent, h: &AsyncHandle| h.close());
//! let sender = handle.sender().unwrap();
//! std::thread::spawn(move || sender.send()).join().unwrap();
//! // returns once the handle is closed
//! assert!(!lp.run(RunMode::Default).unwrap());
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use polling::Events;

use crate::config::LoopConfig;
use crate::error::{LoopError, LoopResult};
use crate::reactor::{ResourceId, WakePort};
use crate::utils::unwrap_or::unwrap_or;
use crate::utils::IdMap;

/// How much work [Loop::run] does before returning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunMode {
  /// Keep going until there are no referenced active handles or pending
  /// closes left, or [Loop::stop] is called
  #[default]
  Default,
  /// Process one batch of events, blocking for it if nothing is pending
  Once,
  /// Process whatever is ready without blocking
  NoWait,
}

/// The loop's view of a registered resource
pub(crate) trait Resident {
  /// Run the native callback
  fn wake(&self);
  /// Publish a failure reported off the loop thread
  fn fault(&self, error: LoopError);
  /// Complete a close requested earlier
  fn finish_close(&self);
  /// Whether this resource prevents [RunMode::Default] from returning
  fn keeps_alive(&self) -> bool;
}

pub(crate) struct LoopData {
  config: LoopConfig,
  port: Arc<WakePort>,
  registry: RefCell<IdMap<Rc<dyn Resident>>>,
  closing: RefCell<VecDeque<ResourceId>>,
  events: RefCell<Events>,
  stop_flag: Cell<bool>,
}

impl Drop for LoopData {
  fn drop(&mut self) {
    tracing::debug!(handles = self.registry.get_mut().len(), "loop dropped");
    self.port.shut_down()
  }
}

/// A single-threaded event loop. Cloning is cheap and every clone refers to
/// the same loop; handles only keep a weak reference, so the embedder decides
/// how long it lives.
#[derive(Clone)]
pub struct Loop(Rc<LoopData>);

impl Loop {
  /// Create a loop with the default configuration
  pub fn new() -> LoopResult<Self> { Self::with_config(LoopConfig::default()) }

  /// Create a loop with the given configuration
  pub fn with_config(config: LoopConfig) -> LoopResult<Self> {
    Ok(Self(Rc::new(LoopData {
      config,
      port: WakePort::new()?,
      registry: RefCell::new(IdMap::new()),
      closing: RefCell::new(VecDeque::new()),
      events: RefCell::new(Events::new()),
      stop_flag: Cell::new(false),
    })))
  }

  /// The configuration this loop was created with
  pub fn config(&self) -> &LoopConfig { &self.0.config }

  pub(crate) fn port(&self) -> Arc<WakePort> { self.0.port.clone() }

  pub(crate) fn downgrade(&self) -> WeakLoop { WeakLoop(Rc::downgrade(&self.0)) }

  /// Reserve the ID a new resource will be registered under
  pub(crate) fn allocate(&self) -> LoopResult<ResourceId> {
    let mut registry = self.0.registry.borrow_mut();
    if let Some(limit) = self.0.config.max_handles {
      if registry.len() >= limit {
        return Err(LoopError::HandleLimit { limit });
      }
    }
    Ok(ResourceId(registry.allocate()))
  }

  /// Keep the resource alive and reachable by ID until its close completes
  pub(crate) fn register(&self, id: ResourceId, resident: Rc<dyn Resident>) {
    self.0.registry.borrow_mut().insert_at(id.0, resident);
    tracing::debug!(%id, "resource registered");
  }

  /// Queue the final stage of a close for the next iteration
  pub(crate) fn schedule_close(&self, id: ResourceId) { self.0.closing.borrow_mut().push_back(id) }

  fn resident(&self, id: ResourceId) -> Option<Rc<dyn Resident>> {
    self.0.registry.borrow().get(id.0).cloned()
  }

  /// Number of registered handles, closing ones included
  pub fn handle_count(&self) -> usize { self.0.registry.borrow().len() }

  /// Whether [RunMode::Default] would find anything to wait for
  pub fn alive(&self) -> bool {
    !self.0.closing.borrow().is_empty()
      || self.0.registry.borrow().map().values().any(|r| r.keeps_alive())
  }

  /// Make the current or next [Loop::run] return after its current
  /// iteration
  pub fn stop(&self) { self.0.stop_flag.set(true) }

  fn has_pending(&self) -> bool { !self.0.closing.borrow().is_empty() || self.0.port.has_pending() }

  fn poll(&self, mode: RunMode) -> LoopResult<()> {
    let timeout = match mode {
      RunMode::NoWait => Some(Duration::ZERO),
      _ if self.has_pending() => Some(Duration::ZERO),
      _ => self.0.config.poll_timeout,
    };
    let mut events = self.0.events.borrow_mut();
    self.0.port.wait(&mut events, timeout)
  }

  /// Serve the faults and wakeups queued when the iteration began. They are
  /// taken one at a time, so if a listener panics the rest stay queued for
  /// the next run.
  fn dispatch(&self) {
    for _ in 0..self.0.port.fault_len() {
      let (id, error) = unwrap_or!(self.0.port.pop_fault(); break);
      match self.resident(id) {
        Some(resident) => resident.fault(error),
        None => tracing::warn!(%id, %error, "fault for a resource that is gone"),
      }
    }
    for _ in 0..self.0.port.ready_len() {
      let id = unwrap_or!(self.0.port.pop_ready(); break);
      let resident = unwrap_or!(self.resident(id); {
        tracing::trace!(%id, "wakeup for a resource that is gone");
        continue
      });
      tracing::trace!(%id, "wakeup");
      resident.wake();
    }
  }

  fn finish_closes(&self) {
    loop {
      let id = unwrap_or!(self.0.closing.borrow_mut().pop_front(); break);
      let resident = self.0.registry.borrow_mut().remove(id.0);
      if let Some(resident) = resident {
        tracing::debug!(%id, "resource closed");
        resident.finish_close();
      }
    }
  }

  /// Run the loop on the current thread. Native callbacks and therefore all
  /// listeners execute inside this call.
  ///
  /// Returns whether the loop is still alive, ie. whether another
  /// [RunMode::Default] run would have anything to do.
  pub fn run(&self, mode: RunMode) -> LoopResult<bool> {
    let mut alive = self.alive();
    while alive && !self.0.stop_flag.get() {
      self.poll(mode)?;
      self.dispatch();
      self.finish_closes();
      alive = self.alive();
      if mode != RunMode::Default {
        break;
      }
    }
    self.0.stop_flag.set(false);
    Ok(alive)
  }
}

impl fmt::Debug for Loop {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Loop")
      .field("config", &self.0.config)
      .field("handles", &self.handle_count())
      .field("closing", &self.0.closing.borrow().len())
      .finish()
  }
}

/// A reference to a loop that doesn't keep it alive
#[derive(Clone)]
pub(crate) struct WeakLoop(Weak<LoopData>);
impl WeakLoop {
  pub fn upgrade(&self) -> LoopResult<Loop> { self.0.upgrade().map(Loop).ok_or(LoopError::LoopGone) }
}
