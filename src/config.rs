//! Knobs an embedder can set when constructing a [crate::event_loop::Loop].

use std::time::Duration;

/// Settings for a [crate::event_loop::Loop]. The defaults impose no handle
/// limit and let the loop block until something happens.
///
/// ```
/// use std::time::Duration;
///
/// use loopbell::config::LoopConfig;
///
/// let cfg = LoopConfig::default().max_handles(16).poll_timeout(Duration::from_millis(5));
/// assert_eq!(cfg.max_handles, Some(16));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopConfig {
  /// How many handles may be registered at the same time. Initializing a
  /// handle beyond this fails.
  pub max_handles: Option<usize>,
  /// Upper bound for a single blocking wait. Without it a loop with nothing
  /// pending sleeps until it is woken.
  pub poll_timeout: Option<Duration>,
}

impl LoopConfig {
  /// Limit the number of live handles
  #[must_use]
  pub fn max_handles(mut self, limit: usize) -> Self {
    self.max_handles = Some(limit);
    self
  }

  /// Never block for longer than the given duration in one wait
  #[must_use]
  pub fn poll_timeout(mut self, timeout: Duration) -> Self {
    self.poll_timeout = Some(timeout);
    self
  }
}
