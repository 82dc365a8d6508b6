#![warn(missing_docs)]
//! Loop-bound resource handles with typed listeners, and an async handle
//! that lets any thread wake the loop.
//!
//! A [event_loop::Loop] runs on one thread and owns a registry of handles.
//! Each handle wraps one native resource and publishes events to listeners
//! registered per event type. [asynch::AsyncHandle] is the cross-thread
//! entry point: workers hold an [asynch::AsyncSender], and every batch of
//! sends turns into an [event::AsyncEvent] on the loop thread.
pub mod asynch;
pub mod config;
pub mod emitter;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod handle;
pub mod reactor;
pub mod utils;

pub use asynch::{AsyncHandle, AsyncSender};
pub use config::LoopConfig;
pub use error::{LoopError, LoopResult};
pub use event_loop::{Loop, RunMode};
