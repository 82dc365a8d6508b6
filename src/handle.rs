//! The generic half of every handle: binding a native resource to a loop,
//! owning it until it is closed, and publishing its events.
//!
//! A concrete handle is a thin newtype over [Handle] that implements [Kind].
//! Listeners receive the concrete type, so they can call its specific
//! methods directly.

use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use trait_set::trait_set;

use crate::emitter::{Connection, Emitter};
use crate::error::{LoopError, LoopResult};
use crate::event::{CloseEvent, ErrorEvent, Event};
use crate::event_loop::{Loop, Resident, WeakLoop};
use crate::reactor::ResourceId;

/// A native resource block exclusively owned by one handle
pub trait Native: 'static {
  /// Stop accepting requests. Called once when the handle starts closing.
  fn close(&self);
}

/// Ties a concrete handle type to its native resource
pub trait Kind: Clone + 'static {
  /// The native block this handle owns
  type Native: Native;
  /// Build the concrete handle around its shared core
  fn wrap(core: Handle<Self>) -> Self;
  /// Access the shared core
  fn core(&self) -> &Handle<Self>;
}

trait_set! {
  /// Native setup routine for [Handle::initialize]. Receives the loop and the
  /// ID the resource will be registered under.
  pub trait Setup<N> = FnOnce(&Loop, ResourceId) -> LoopResult<N>;
}

/// Lifecycle of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
  /// Created but not bound to the loop, initialization may be retried
  Uninitialized,
  /// Bound to the loop and armed
  Active,
  /// A close was requested, the loop finishes it on its next iteration
  Closing,
  /// The native resource was released, no further events will be published
  Closed,
}

struct HandleData<K: Kind> {
  lp: WeakLoop,
  id: Cell<Option<ResourceId>>,
  state: Cell<HandleState>,
  referenced: Cell<bool>,
  native: RefCell<Option<Rc<K::Native>>>,
  last_error: RefCell<Option<LoopError>>,
  emitter: Emitter<K>,
}

/// Shared core of a loop-bound resource. Clones refer to the same resource.
pub struct Handle<K: Kind>(Rc<HandleData<K>>);

impl<K: Kind> Handle<K> {
  /// Create an uninitialized handle on the given loop
  #[must_use]
  pub fn create(lp: &Loop) -> Self {
    Self(Rc::new(HandleData {
      lp: lp.downgrade(),
      id: Cell::new(None),
      state: Cell::new(HandleState::Uninitialized),
      referenced: Cell::new(true),
      native: RefCell::new(None),
      last_error: RefCell::new(None),
      emitter: Emitter::new(),
    }))
  }

  /// Run the native setup against the loop and register the handle so that
  /// the loop can reach it with `callback`.
  ///
  /// On failure the handle stays [HandleState::Uninitialized], the error is
  /// also kept in [Handle::last_error] and initialization can be retried.
  pub fn initialize(&self, setup: impl Setup<K::Native>, callback: fn(&K)) -> LoopResult<()> {
    let res = self.try_initialize(setup, callback);
    if let Err(e) = &res {
      tracing::debug!(kind = type_name::<K>(), error = %e, "handle setup failed");
      *self.0.last_error.borrow_mut() = Some(e.clone());
    }
    res
  }

  fn try_initialize(&self, setup: impl Setup<K::Native>, callback: fn(&K)) -> LoopResult<()> {
    if self.0.state.get() != HandleState::Uninitialized {
      return Err(LoopError::AlreadyInitialized);
    }
    let lp = self.event_loop()?;
    let id = lp.allocate()?;
    let native = setup(&lp, id)?;
    *self.0.native.borrow_mut() = Some(Rc::new(native));
    self.0.id.set(Some(id));
    self.0.state.set(HandleState::Active);
    lp.register(id, Rc::new(Binding { handle: K::wrap(self.clone()), callback }));
    Ok(())
  }

  /// Call a native operation on the owned resource. A failure is recorded in
  /// [Handle::last_error] and published as an [ErrorEvent] instead of being
  /// returned, the result only says whether the call went through.
  ///
  /// The operation may close the handle; the native block outlives the call.
  pub fn invoke(&self, op: impl FnOnce(&K::Native) -> LoopResult<()>) -> bool {
    let native = self.0.native.borrow().clone();
    let res = match (native, self.0.state.get()) {
      (Some(native), HandleState::Active) => op(&*native),
      (_, HandleState::Uninitialized) => Err(LoopError::NotInitialized),
      _ => Err(LoopError::Closed),
    };
    match res {
      Ok(()) => true,
      Err(e) => {
        self.report(e);
        false
      },
    }
  }

  /// Give the native resource to a closure, if it exists
  pub(crate) fn with_native<R>(&self, f: impl FnOnce(&K::Native) -> R) -> Option<R> {
    let native = self.0.native.borrow().clone();
    native.map(|n| f(&*n))
  }

  fn report(&self, error: LoopError) {
    tracing::debug!(id = ?self.id(), kind = type_name::<K>(), %error, "handle operation failed");
    *self.0.last_error.borrow_mut() = Some(error.clone());
    self.publish(ErrorEvent::new(error))
  }

  /// Deliver an event to every listener registered for its type
  pub fn publish<E: Event>(&self, event: E) {
    let this = K::wrap(self.clone());
    self.0.emitter.publish(&event, &this)
  }

  /// Register a listener for events of type `E`
  pub fn on<E: Event>(&self, listener: impl FnMut(&E, &K) + 'static) -> Connection<E> {
    self.0.emitter.on(listener)
  }

  /// Register a listener that only receives the next event of type `E`
  pub fn once<E: Event>(&self, listener: impl FnMut(&E, &K) + 'static) -> Connection<E> {
    self.0.emitter.once(listener)
  }

  /// Remove a listener. Unknown connections are ignored.
  pub fn erase<E: Event>(&self, conn: Connection<E>) { self.0.emitter.erase(conn) }

  /// Remove every listener for `E`
  pub fn clear<E: Event>(&self) { self.0.emitter.clear::<E>() }

  /// Remove every listener
  pub fn clear_all(&self) { self.0.emitter.clear_all() }

  /// Whether any listener is registered for `E`
  pub fn has_listeners<E: Event>(&self) -> bool { self.0.emitter.has_listeners::<E>() }

  /// Request the handle to be closed. The native resource stops accepting
  /// work immediately, a [CloseEvent] follows on the loop's next iteration.
  /// Does nothing unless the handle is active.
  pub fn close(&self) {
    if self.0.state.get() != HandleState::Active {
      return;
    }
    self.0.state.set(HandleState::Closing);
    self.with_native(Native::close);
    match (self.event_loop(), self.id()) {
      (Ok(lp), Some(id)) => lp.schedule_close(id),
      // nobody is left to finish the close
      _ => self.finish_close(),
    }
  }

  fn finish_close(&self) {
    self.0.state.set(HandleState::Closed);
    let native = self.0.native.borrow_mut().take();
    drop(native);
    self.publish(CloseEvent)
  }

  /// The current lifecycle stage
  pub fn state(&self) -> HandleState { self.0.state.get() }

  /// Whether the handle is bound to the loop and not closing
  pub fn active(&self) -> bool { self.state() == HandleState::Active }

  /// Whether a close was requested but hasn't completed yet
  pub fn closing(&self) -> bool { self.state() == HandleState::Closing }

  /// Let this handle keep [crate::event_loop::RunMode::Default] running. This is the
  /// default.
  pub fn reference(&self) { self.0.referenced.set(true) }

  /// Stop this handle from keeping [crate::event_loop::RunMode::Default]
  /// running. Events are still delivered while the loop runs for other
  /// reasons.
  pub fn unreference(&self) { self.0.referenced.set(false) }

  /// See [Handle::reference] and [Handle::unreference]
  pub fn referenced(&self) -> bool { self.0.referenced.get() }

  /// The ID the loop knows this handle by, once initialized
  pub fn id(&self) -> Option<ResourceId> { self.0.id.get() }

  /// The most recent failure of this handle
  pub fn last_error(&self) -> Option<LoopError> { self.0.last_error.borrow().clone() }

  /// The loop this handle was created on
  pub fn event_loop(&self) -> LoopResult<Loop> { self.0.lp.upgrade() }
}

impl<K: Kind> Clone for Handle<K> {
  fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<K: Kind> fmt::Debug for Handle<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Handle")
      .field("kind", &type_name::<K>())
      .field("id", &self.id())
      .field("state", &self.state())
      .field("referenced", &self.referenced())
      .finish_non_exhaustive()
  }
}

/// Registry entry: the loop owns one of these per live handle
struct Binding<K: Kind> {
  handle: K,
  callback: fn(&K),
}
impl<K: Kind> Resident for Binding<K> {
  fn wake(&self) {
    // closing handles receive no callbacks
    if self.handle.core().active() {
      (self.callback)(&self.handle)
    }
  }
  fn fault(&self, error: LoopError) { self.handle.core().report(error) }
  fn finish_close(&self) { self.handle.core().finish_close() }
  fn keeps_alive(&self) -> bool {
    let core = self.handle.core();
    core.active() && core.referenced()
  }
}
