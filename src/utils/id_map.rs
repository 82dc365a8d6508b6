use hashbrown::HashMap;

/// A map that automatically assigns a unique ID to every entry.
///
/// # How unique?
///
/// If you registered a new entry every nanosecond, it would take more than
/// 550_000 years to run out of indices. A loop that opens a handle every 10ms
/// will not get anywhere near that.
#[derive(Clone, Debug)]
pub struct IdMap<T> {
  next_id: u64,
  data: HashMap<u64, T>,
}
impl<T> IdMap<T> {
  /// Create a new empty map
  pub fn new() -> Self { Self { next_id: 0, data: HashMap::new() } }

  /// Obtain a reference to the underlying map for iteration
  pub fn map(&self) -> &HashMap<u64, T> { &self.data }

  /// Reserve an ID without storing anything under it yet. It can be filled
  /// later with [IdMap::insert_at] or simply abandoned; it will never be
  /// handed out again either way.
  pub fn allocate(&mut self) -> u64 {
    let id = self.next_id;
    self.next_id += 1;
    id
  }

  /// Insert an element with a new ID and return the ID
  pub fn insert(&mut self, t: T) -> u64 {
    let id = self.allocate();
    self.insert_at(id, t);
    id
  }

  /// Store an element under an ID previously obtained from
  /// [IdMap::allocate].
  ///
  /// # Panics
  ///
  /// if the ID was never allocated or is already occupied
  pub fn insert_at(&mut self, id: u64, t: T) {
    assert!(id < self.next_id, "IdMap keys must be allocated before use");
    (self.data.try_insert(id, t)).unwrap_or_else(|_| panic!("IdMap keys should be unique"));
  }

  /// Obtain a reference to the element with the given ID
  pub fn get(&self, id: u64) -> Option<&T> { self.data.get(&id) }

  /// Obtain a mutable reference to the element with the given ID
  pub fn get_mut(&mut self, id: u64) -> Option<&mut T> { self.data.get_mut(&id) }

  /// Remove the element with the given ID from the map. The ID will not be
  /// reused.
  pub fn remove(&mut self, id: u64) -> Option<T> { self.data.remove(&id) }

  /// Number of occupied IDs
  pub fn len(&self) -> usize { self.data.len() }

  /// Whether no IDs are occupied
  pub fn is_empty(&self) -> bool { self.data.is_empty() }
}

impl<T> Default for IdMap<T> {
  fn default() -> Self { Self::new() }
}
