//! Ordered listener lists keyed by event type. Every handle owns one
//! [Emitter] and passes itself as the source of the events it publishes.

use std::any::{type_name, Any, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::event::Event;
use crate::utils::unwrap_or::unwrap_or;

type SharedListener<E, H> = Rc<RefCell<dyn FnMut(&E, &H)>>;

/// Identifies one registration made with [Emitter::on] or [Emitter::once]
/// so it can be passed to [Emitter::erase] later.
pub struct Connection<E> {
  id: u64,
  _event: PhantomData<fn(&E)>,
}
impl<E> Connection<E> {
  fn new(id: u64) -> Self { Self { id, _event: PhantomData } }
}
impl<E> Clone for Connection<E> {
  fn clone(&self) -> Self { *self }
}
impl<E> Copy for Connection<E> {}
impl<E> PartialEq for Connection<E> {
  fn eq(&self, other: &Self) -> bool { self.id == other.id }
}
impl<E> Eq for Connection<E> {}
impl<E> Hash for Connection<E> {
  fn hash<S: Hasher>(&self, state: &mut S) { self.id.hash(state) }
}
impl<E> fmt::Debug for Connection<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Connection<{}>({})", type_name::<E>(), self.id)
  }
}

struct Entry<E, H> {
  id: u64,
  once: bool,
  callback: SharedListener<E, H>,
}

/// Entries are sorted by id because ids only ever grow. Empty lists are
/// removed from the map.
struct ListenerList<E, H>(Vec<Entry<E, H>>);
impl<E, H> ListenerList<E, H> {
  fn position(&self, id: u64) -> Option<usize> {
    self.0.binary_search_by_key(&id, |e| e.id).ok()
  }
}

/// Publish/subscribe registry with one ordered list per event type.
///
/// Dispatch works on a snapshot of the list, so listeners can freely add or
/// erase registrations while an event is being published. Anything erased
/// mid-dispatch is skipped for the rest of the pass, anything added only
/// sees the next publication.
pub struct Emitter<H> {
  next_id: Cell<u64>,
  lists: RefCell<HashMap<TypeId, Box<dyn Any>>>,
  _source: PhantomData<fn(&H)>,
}

impl<H: 'static> Emitter<H> {
  /// Create an emitter with no listeners
  #[must_use]
  pub fn new() -> Self {
    Self { next_id: Cell::new(0), lists: RefCell::new(HashMap::new()), _source: PhantomData }
  }

  fn downcast<E: Event>(list: &mut Box<dyn Any>) -> &mut ListenerList<E, H> {
    list.downcast_mut().expect("keyed by TypeId")
  }

  fn add<E: Event>(&self, once: bool, callback: impl FnMut(&E, &H) + 'static) -> Connection<E> {
    let id = self.next_id.get();
    self.next_id.set(id + 1);
    let mut lists = self.lists.borrow_mut();
    let list = (lists.entry(TypeId::of::<E>()))
      .or_insert_with(|| Box::new(ListenerList::<E, H>(Vec::new())));
    let callback: SharedListener<E, H> = Rc::new(RefCell::new(callback));
    Self::downcast::<E>(list).0.push(Entry { id, once, callback });
    Connection::new(id)
  }

  /// Register a listener for events of type `E`. Listeners run in the order
  /// they were registered, the same closure may be registered any number of
  /// times.
  pub fn on<E: Event>(&self, listener: impl FnMut(&E, &H) + 'static) -> Connection<E> {
    self.add(false, listener)
  }

  /// Register a listener that is removed right before its first invocation
  pub fn once<E: Event>(&self, listener: impl FnMut(&E, &H) + 'static) -> Connection<E> {
    self.add(true, listener)
  }

  /// Remove a registration. Unknown or already removed connections are
  /// ignored.
  pub fn erase<E: Event>(&self, conn: Connection<E>) {
    let removed = {
      let mut lists = self.lists.borrow_mut();
      let list = unwrap_or!(lists.get_mut(&TypeId::of::<E>()); return);
      let list = Self::downcast::<E>(list);
      let pos = unwrap_or!(list.position(conn.id); return);
      let entry = list.0.remove(pos);
      if list.0.is_empty() {
        lists.remove(&TypeId::of::<E>());
      }
      entry
    };
    // the closure may own things whose destructors touch this emitter
    mem::drop(removed)
  }

  /// Remove every listener for events of type `E`
  pub fn clear<E: Event>(&self) {
    let removed = self.lists.borrow_mut().remove(&TypeId::of::<E>());
    mem::drop(removed)
  }

  /// Remove every listener
  pub fn clear_all(&self) {
    let removed = mem::take(&mut *self.lists.borrow_mut());
    mem::drop(removed)
  }

  /// Number of listeners currently registered for `E`
  #[must_use]
  pub fn listener_count<E: Event>(&self) -> usize {
    let mut lists = self.lists.borrow_mut();
    lists.get_mut(&TypeId::of::<E>()).map_or(0, |l| Self::downcast::<E>(l).0.len())
  }

  /// Whether anybody listens to `E`
  #[must_use]
  pub fn has_listeners<E: Event>(&self) -> bool { self.listener_count::<E>() != 0 }

  /// Whether no listeners are registered for any event type
  #[must_use]
  pub fn is_empty(&self) -> bool { self.lists.borrow().is_empty() }

  /// Check that the registration is still present, consuming it if it was
  /// registered with [Emitter::once]
  fn claim<E: Event>(&self, id: u64) -> bool {
    let mut lists = self.lists.borrow_mut();
    let list = unwrap_or!(lists.get_mut(&TypeId::of::<E>()); return false);
    let list = Self::downcast::<E>(list);
    let pos = unwrap_or!(list.position(id); return false);
    if list.0[pos].once {
      // the snapshot in publish still holds the callback
      list.0.remove(pos);
      if list.0.is_empty() {
        lists.remove(&TypeId::of::<E>());
      }
    }
    true
  }

  /// Invoke every listener registered for `E` in registration order.
  ///
  /// A panicking listener aborts the pass, later listeners don't run for
  /// this event and the panic propagates to the caller.
  pub fn publish<E: Event>(&self, event: &E, source: &H) {
    let snapshot: Vec<(u64, SharedListener<E, H>)> = {
      let mut lists = self.lists.borrow_mut();
      let list = unwrap_or!(lists.get_mut(&TypeId::of::<E>()); return);
      Self::downcast::<E>(list).0.iter().map(|e| (e.id, e.callback.clone())).collect()
    };
    for (id, callback) in snapshot {
      if !self.claim::<E>(id) {
        continue;
      }
      let mut callback = match callback.try_borrow_mut() {
        Ok(cb) => cb,
        Err(_) => {
          tracing::warn!(event = type_name::<E>(), "listener re-entered its own event, skipped");
          continue;
        },
      };
      (&mut *callback)(event, source)
    }
  }
}

impl<H: 'static> Default for Emitter<H> {
  fn default() -> Self { Self::new() }
}

impl<H> fmt::Debug for Emitter<H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Emitter")
      .field("event_types", &self.lists.borrow().len())
      .field("source", &type_name::<H>())
      .finish()
  }
}

#[cfg(test)]
mod test {
  use std::cell::RefCell;
  use std::panic::{catch_unwind, AssertUnwindSafe};
  use std::rc::Rc;

  use super::Emitter;
  use crate::event::{AsyncEvent, CloseEvent, Event};

  struct Ping(u32);
  impl Event for Ping {}

  type Log = Rc<RefCell<Vec<&'static str>>>;

  fn logger(log: &Log, name: &'static str) -> impl FnMut(&AsyncEvent, &u8) + 'static {
    let log = log.clone();
    move |_, _| log.borrow_mut().push(name)
  }

  #[test]
  fn runs_in_registration_order() {
    let em = Emitter::<u8>::new();
    let log = Log::default();
    for name in ["a", "b", "c", "d"] {
      em.on(logger(&log, name));
    }
    em.publish(&AsyncEvent, &0);
    assert_eq!(*log.borrow(), ["a", "b", "c", "d"]);
  }

  #[test]
  fn duplicates_are_kept() {
    let em = Emitter::<u8>::new();
    let log = Log::default();
    em.on(logger(&log, "x"));
    em.on(logger(&log, "x"));
    em.publish(&AsyncEvent, &0);
    assert_eq!(log.borrow().len(), 2);
  }

  #[test]
  fn listeners_see_payload_and_source() {
    let em = Emitter::<u8>::new();
    let seen = Rc::new(RefCell::new(None));
    let seen2 = seen.clone();
    em.on(move |p: &Ping, src: &u8| *seen2.borrow_mut() = Some((p.0, *src)));
    em.publish(&Ping(7), &3);
    assert_eq!(*seen.borrow(), Some((7, 3)));
  }

  #[test]
  fn event_types_are_separate() {
    let em = Emitter::<u8>::new();
    let log = Log::default();
    em.on(logger(&log, "async"));
    let log2 = log.clone();
    em.on(move |_: &CloseEvent, _: &u8| log2.borrow_mut().push("close"));
    em.publish(&CloseEvent, &0);
    assert_eq!(*log.borrow(), ["close"]);
    assert_eq!(em.listener_count::<AsyncEvent>(), 1);
    assert!(!em.has_listeners::<Ping>());
  }

  #[test]
  fn erase_removes_only_that_listener() {
    let em = Emitter::<u8>::new();
    let log = Log::default();
    em.on(logger(&log, "a"));
    let b = em.on(logger(&log, "b"));
    em.on(logger(&log, "c"));
    em.erase(b);
    em.publish(&AsyncEvent, &0);
    em.publish(&AsyncEvent, &0);
    assert_eq!(*log.borrow(), ["a", "c", "a", "c"]);
  }

  #[test]
  fn erasing_unknown_ids_is_a_noop() {
    let em = Emitter::<u8>::new();
    let other = Emitter::<u8>::new();
    let log = Log::default();
    let a = em.on(logger(&log, "a"));
    em.erase(a);
    em.erase(a);
    let foreign = other.on(|_: &Ping, _: &u8| ());
    em.erase(foreign);
    em.on(logger(&log, "b"));
    em.publish(&AsyncEvent, &0);
    assert_eq!(*log.borrow(), ["b"]);
  }

  #[test]
  fn listener_can_erase_a_later_one_mid_dispatch() {
    let em = Rc::new(Emitter::<u8>::new());
    let log = Log::default();
    let victim = Rc::new(RefCell::new(None));
    let (em2, victim2, log2) = (em.clone(), victim.clone(), log.clone());
    em.on(move |_: &AsyncEvent, _: &u8| {
      log2.borrow_mut().push("first");
      if let Some(conn) = victim2.borrow_mut().take() {
        em2.erase(conn)
      }
    });
    *victim.borrow_mut() = Some(em.on(logger(&log, "second")));
    em.publish(&AsyncEvent, &0);
    assert_eq!(*log.borrow(), ["first"]);
  }

  #[test]
  fn listener_can_erase_itself() {
    let em = Rc::new(Emitter::<u8>::new());
    let count = Rc::new(RefCell::new(0));
    let me = Rc::new(RefCell::new(None));
    let (em2, me2, count2) = (em.clone(), me.clone(), count.clone());
    let conn = em.on(move |_: &AsyncEvent, _: &u8| {
      *count2.borrow_mut() += 1;
      if let Some(conn) = me2.borrow_mut().take() {
        em2.erase(conn)
      }
    });
    *me.borrow_mut() = Some(conn);
    em.publish(&AsyncEvent, &0);
    em.publish(&AsyncEvent, &0);
    assert_eq!(*count.borrow(), 1);
    assert!(!em.has_listeners::<AsyncEvent>());
  }

  #[test]
  fn listeners_added_mid_dispatch_wait_for_the_next_pass() {
    let em = Rc::new(Emitter::<u8>::new());
    let log = Log::default();
    let (em2, log2) = (em.clone(), log.clone());
    em.once(move |_: &AsyncEvent, _: &u8| {
      log2.borrow_mut().push("outer");
      em2.on(logger(&log2, "inner"));
    });
    em.publish(&AsyncEvent, &0);
    assert_eq!(*log.borrow(), ["outer"]);
    em.publish(&AsyncEvent, &0);
    assert_eq!(*log.borrow(), ["outer", "inner"]);
  }

  #[test]
  fn once_fires_a_single_time() {
    let em = Emitter::<u8>::new();
    let log = Log::default();
    em.once(logger(&log, "once"));
    em.on(logger(&log, "always"));
    em.publish(&AsyncEvent, &0);
    em.publish(&AsyncEvent, &0);
    assert_eq!(*log.borrow(), ["once", "always", "always"]);
  }

  #[test]
  fn panic_aborts_the_rest_of_the_pass() {
    let em = Emitter::<u8>::new();
    let log = Log::default();
    em.on(logger(&log, "a"));
    em.on(|_: &AsyncEvent, _: &u8| panic!("listener failure"));
    em.on(logger(&log, "c"));
    let res = catch_unwind(AssertUnwindSafe(|| em.publish(&AsyncEvent, &0)));
    assert!(res.is_err());
    assert_eq!(*log.borrow(), ["a"]);
    assert_eq!(em.listener_count::<AsyncEvent>(), 3);
  }

  #[test]
  fn recursive_publication_skips_the_running_listener() {
    let em = Rc::new(Emitter::<u8>::new());
    let count = Rc::new(RefCell::new(0));
    let (em2, count2) = (em.clone(), count.clone());
    em.on(move |_: &AsyncEvent, _: &u8| {
      *count2.borrow_mut() += 1;
      em2.publish(&AsyncEvent, &1);
    });
    em.publish(&AsyncEvent, &0);
    assert_eq!(*count.borrow(), 1);
  }

  #[test]
  fn clearing() {
    let em = Emitter::<u8>::new();
    let log = Log::default();
    em.on(logger(&log, "a"));
    em.on(|_: &Ping, _: &u8| ());
    em.clear::<AsyncEvent>();
    assert!(!em.has_listeners::<AsyncEvent>());
    assert!(!em.is_empty());
    em.clear_all();
    assert!(em.is_empty());
    em.publish(&AsyncEvent, &0);
    assert!(log.borrow().is_empty());
  }
}
