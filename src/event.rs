//! Event envelopes. Each type is one category of notification, listeners are
//! keyed by the [std::any::TypeId] of these, never by their value.

use crate::error::LoopError;

/// Marker for types that can be published by a handle. Implement it on a
/// plain struct to define a new category.
pub trait Event: 'static {}

/// Emitted on the loop thread after one or more sends on an
/// [crate::asynch::AsyncHandle]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsyncEvent;
impl Event for AsyncEvent {}

/// Emitted once when a handle has finished closing. No further events follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseEvent;
impl Event for CloseEvent {}

/// An operation on the native resource failed after initialization
#[derive(Debug, Clone)]
pub struct ErrorEvent {
  /// What went wrong
  pub error: LoopError,
}
impl ErrorEvent {
  /// Wrap an error for publication
  pub fn new(error: LoopError) -> Self { Self { error } }
}
impl Event for ErrorEvent {}
